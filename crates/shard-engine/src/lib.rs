//! shard-engine: multi-backend encryption engine
//!
//! ```text
//!            password ──► PBKDF2 ──► envelope ─┐
//!                                              ▼
//!  chain shares (one per backend) ── blend ── layer keys ──► TransformChain
//!                                                              │
//!  local file ─► ReaderDataset ─► AES-CBC layers ─► CachedFileStream ─► backend
//! ```
//!
//! Catalogs of encryption sets and key chains live on backend 0, tagged with
//! an HMAC keyed by the backend identities.

pub mod catalog;
pub mod engine;
pub mod probe;
pub mod registry;

pub use catalog::{EncryptionLayer, EncryptionSet, KeyChain};
pub use engine::{Backend, Engine};
