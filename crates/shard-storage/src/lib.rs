//! shard-storage: backend contract, chunk cache and cached file stream
//!
//! Concrete cloud adapters live outside this crate; they implement
//! [`CloudStorage`]. Two adapters ship here: a local directory (each
//! directory stands in for one cloud) and an in-memory store for tests.
//!
//! ```text
//! ReaderDataset ─► CachedFileStream ─► ChunkCache (clean / dirty per handle)
//!                          │
//!                          └─► FileHandle ─► CloudStorage (ranged read, upload)
//! ```

pub mod backend;
pub mod cache;
pub mod handle;
pub mod local;
pub mod memory;
pub mod stream;

pub use backend::{normalize_path, CloudStorage, EntryInfo, UploadSink};
pub use cache::{CachedChunk, ChunkCache, MemoryChunkCache};
pub use handle::{FileHandle, StorageFileHandle};
pub use local::LocalFsBackend;
pub use memory::MemoryStorage;
pub use stream::CachedFileStream;
