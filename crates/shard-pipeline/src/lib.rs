//! shard-pipeline: pull-based, multi-consumer block streaming
//!
//! A `Dataset` is an ordered set of independent item streams. Consumers
//! register with their own block size and padding, then pull blocks per item.
//! A `Transform` is a stateless descriptor; connecting it to a source yields a
//! `ConnectedTransform` that owns per-item progress and exposes a result
//! dataset. Nothing runs on its own: the caller steps with `transform_next()`.
//!
//! ```text
//! ReaderDataset ──► [pad → AES-CBC enc] ──► [pad → AES-CBC enc] ──► consumer
//!        file/remote         layer 0               layer 1
//! ```
//!
//! Stepping follows a two-phase drain contract, see [`transform`].

pub mod cipher;
pub mod count;
pub mod dataset;
pub mod memory;
pub mod padding;
pub mod source;
pub mod transform;
pub mod unpad;

pub use cipher::{AesCbcTransform, CipherMode, AES_BLOCK_SIZE, AES_KEY_SIZE};
pub use count::ItemCount;
pub use dataset::{ConsumerToken, Dataset};
pub use memory::MemoryDataset;
pub use padding::{NoPadding, Padding, RandomPadding, ZeroPadding};
pub use source::ReaderDataset;
pub use transform::{
    drain_to, run_to_completion, stream_item_to, transform_items, ConnectedChain,
    ConnectedTransform, Transform, TransformChain,
};
pub use unpad::UnpadTransform;
