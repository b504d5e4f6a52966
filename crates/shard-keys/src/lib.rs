//! shard-keys: key material for multi-backend key splitting
//!
//! Layer keys are never stored directly. For N backends a key chain of N
//! independent shares is generated; each layer key is XOR-blended against
//! every share and the blended result is stored. Recovering a layer key needs
//! the password and every backend's blob.
//!
//! ```text
//! chain[i]  ──seal(pw)──► backend i
//! layer[j] ⊕ chain[0] ⊕ … ⊕ chain[N-1] ──seal(pw)──► backend N - j%N - 1
//! ```
//!
//! Key bytes are not wiped from memory on drop.

pub mod blend;
pub mod container;
pub mod envelope;
pub mod material;

pub use blend::blend;
pub use container::{
    decode_payload, encode_payload, from_container, to_container, CONTAINER_VERSION,
};
pub use envelope::{open, seal, EnvelopeParams, SALT_LEN};
pub use material::{KeyMaterial, DEFAULT_MATERIAL_LEN};
