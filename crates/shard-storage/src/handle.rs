//! Remote file handles: one per open operation.

use std::sync::Arc;

use shard_core::types::{BackendId, HandleId};
use shard_core::{OsRandom, ShardError, ShardResult};

use crate::backend::{normalize_path, CloudStorage, UploadSink};

pub trait FileHandle {
    /// Unique per open; owns this handle's dirty cache chunks
    fn id(&self) -> HandleId;

    fn backend_id(&self) -> BackendId;

    /// Normalised path within the backend
    fn path(&self) -> &str;

    fn name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_default()
    }

    /// Remote length as last observed or committed
    fn length(&self) -> u64;

    fn exists(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn fetch_range(&self, offset: u64, size: usize) -> ShardResult<Vec<u8>>;

    fn send(&mut self, new_length: u64) -> ShardResult<Box<dyn UploadSink>>;

    /// Record a successful upload of `new_length` bytes.
    fn mark_committed(&mut self, new_length: u64);
}

/// [`FileHandle`] over any [`CloudStorage`].
pub struct StorageFileHandle {
    id: HandleId,
    backend_id: BackendId,
    storage: Arc<dyn CloudStorage>,
    path: String,
    length: u64,
    exists: bool,
    writable: bool,
}

impl StorageFileHandle {
    pub fn open(
        storage: Arc<dyn CloudStorage>,
        backend_id: BackendId,
        path: &str,
        writable: bool,
    ) -> ShardResult<Self> {
        let path = normalize_path(path)?;
        let exists = storage.file_exists(&path)?;
        if !exists && !writable {
            return Err(ShardError::NotFound(format!("{}:{path}", storage.name())));
        }
        let length = if exists { storage.file_size(&path)? } else { 0 };
        Ok(Self {
            id: HandleId::generate(&OsRandom),
            backend_id,
            storage,
            path,
            length,
            exists,
            writable,
        })
    }

    /// Writable handle that replaces whatever is stored at `path`: the
    /// existing remote content is never read through it.
    pub fn create(
        storage: Arc<dyn CloudStorage>,
        backend_id: BackendId,
        path: &str,
    ) -> ShardResult<Self> {
        let path = normalize_path(path)?;
        let exists = storage.file_exists(&path)?;
        Ok(Self {
            id: HandleId::generate(&OsRandom),
            backend_id,
            storage,
            path,
            length: 0,
            exists,
            writable: true,
        })
    }
}

impl FileHandle for StorageFileHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn exists(&self) -> bool {
        self.exists
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn fetch_range(&self, offset: u64, size: usize) -> ShardResult<Vec<u8>> {
        if !self.exists || offset >= self.length || size == 0 {
            return Ok(Vec::new());
        }
        self.storage.read_range(&self.path, offset, size)
    }

    fn send(&mut self, new_length: u64) -> ShardResult<Box<dyn UploadSink>> {
        if !self.writable {
            return Err(ShardError::Configuration(format!(
                "{} was opened read-only",
                self.path
            )));
        }
        self.storage.open_write(&self.path, new_length)
    }

    fn mark_committed(&mut self, new_length: u64) {
        self.length = new_length;
        self.exists = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use shard_core::SeededRandom;

    fn storage() -> Arc<dyn CloudStorage> {
        let s = MemoryStorage::new("mem");
        s.write_all("dir/file", b"abcdef").unwrap();
        Arc::new(s)
    }

    #[test]
    fn test_open_existing() {
        let backend = BackendId::generate(&SeededRandom::new(1));
        let h = StorageFileHandle::open(storage(), backend, "/dir//file", false).unwrap();
        assert_eq!(h.path(), "dir/file");
        assert_eq!(h.name(), "file");
        assert_eq!(h.length(), 6);
        assert!(h.exists());
        assert_eq!(h.fetch_range(2, 3).unwrap(), b"cde");
        assert!(h.fetch_range(6, 3).unwrap().is_empty());
    }

    #[test]
    fn test_missing_read_only_is_not_found() {
        let backend = BackendId::generate(&SeededRandom::new(1));
        assert!(matches!(
            StorageFileHandle::open(storage(), backend, "nope", false),
            Err(ShardError::NotFound(_))
        ));
        let h = StorageFileHandle::open(storage(), backend, "nope", true).unwrap();
        assert!(!h.exists());
        assert_eq!(h.length(), 0);
    }

    #[test]
    fn test_create_ignores_existing_content() {
        let backend = BackendId::generate(&SeededRandom::new(1));
        let h = StorageFileHandle::create(storage(), backend, "dir/file").unwrap();
        assert!(h.exists());
        assert_eq!(h.length(), 0);
        assert!(h.fetch_range(0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_unique_ids_and_read_only_send() {
        let backend = BackendId::generate(&SeededRandom::new(1));
        let s = storage();
        let a = StorageFileHandle::open(s.clone(), backend, "dir/file", false).unwrap();
        let mut b = StorageFileHandle::open(s, backend, "dir/file", false).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(matches!(b.send(1), Err(ShardError::Configuration(_))));
    }
}
