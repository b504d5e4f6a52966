//! Write-back chunk cache with per-handle dirty isolation.
//!
//! Entries are keyed by (backend id, normalised path, chunk index). Each key
//! holds at most one clean entry, visible to every handle, plus at most one
//! dirty entry per owning handle, visible only to that handle. Expiry is lazy:
//! entries older than the TTL are invisible to lookups and dropped when seen.
//! There is no background eviction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use shard_core::types::{BackendId, HandleId};
use shard_core::{ShardError, ShardResult};

use crate::handle::FileHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChunk {
    pub data: Vec<u8>,
    pub is_last: bool,
    pub dirty: bool,
}

pub trait ChunkCache: Send + Sync {
    fn chunk_size(&self) -> usize;

    /// Fresh dirty entry owned by `file`'s handle, else fresh clean entry.
    fn try_fetch(&self, file: &dyn FileHandle, chunk: u64) -> Option<CachedChunk>;

    fn put(
        &self,
        file: &dyn FileHandle,
        chunk: u64,
        data: &[u8],
        is_last: bool,
        dirty: bool,
    ) -> ShardResult<()>;

    /// Promote the handle's fresh dirty chunks to clean.
    fn flush_file(&self, file: &dyn FileHandle) -> ShardResult<()>;

    /// Drop clean chunks past the last chunk of a file of `new_length` bytes.
    /// Dirty chunks are left alone.
    fn cut_file_length(&self, file: &dyn FileHandle, new_length: u64) -> ShardResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    backend: BackendId,
    path: String,
}

impl FileKey {
    fn of(file: &dyn FileHandle) -> Self {
        Self {
            backend: file.backend_id(),
            path: file.path().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    is_last: bool,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    clean: Option<Entry>,
    dirty: HashMap<HandleId, Entry>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.clean.is_none() && self.dirty.is_empty()
    }
}

type Files = HashMap<FileKey, HashMap<u64, Slot>>;

pub struct MemoryChunkCache {
    chunk_size: usize,
    ttl: Duration,
    files: Mutex<Files>,
}

impl MemoryChunkCache {
    pub fn new(chunk_size: usize, ttl: Duration) -> ShardResult<Self> {
        if chunk_size == 0 {
            return Err(ShardError::Configuration("chunk size must be > 0".into()));
        }
        Ok(Self {
            chunk_size,
            ttl,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stored entries, stale ones included.
    pub fn entry_count(&self) -> usize {
        self.lock()
            .values()
            .flat_map(|chunks| chunks.values())
            .map(|slot| slot.clean.iter().count() + slot.dirty.len())
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, Files> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh(&self, entry: &Entry) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }
}

impl ChunkCache for MemoryChunkCache {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn try_fetch(&self, file: &dyn FileHandle, chunk: u64) -> Option<CachedChunk> {
        let mut files = self.lock();
        let slot = files.get_mut(&FileKey::of(file))?.get_mut(&chunk)?;
        let handle = file.id();

        if slot.dirty.get(&handle).is_some_and(|e| !self.fresh(e)) {
            slot.dirty.remove(&handle);
        }
        if slot.clean.as_ref().is_some_and(|e| !self.fresh(e)) {
            slot.clean = None;
        }

        if let Some(entry) = slot.dirty.get(&handle) {
            return Some(CachedChunk {
                data: entry.data.clone(),
                is_last: entry.is_last,
                dirty: true,
            });
        }
        slot.clean.as_ref().map(|entry| CachedChunk {
            data: entry.data.clone(),
            is_last: entry.is_last,
            dirty: false,
        })
    }

    fn put(
        &self,
        file: &dyn FileHandle,
        chunk: u64,
        data: &[u8],
        is_last: bool,
        dirty: bool,
    ) -> ShardResult<()> {
        if data.is_empty() {
            return Err(ShardError::Range("cannot cache an empty chunk".into()));
        }
        if data.len() > self.chunk_size || (!is_last && data.len() != self.chunk_size) {
            return Err(ShardError::Range(format!(
                "chunk {chunk} of {} bytes does not match chunk size {} (last: {is_last})",
                data.len(),
                self.chunk_size
            )));
        }

        let entry = Entry {
            data: data.to_vec(),
            is_last,
            stored_at: Instant::now(),
        };
        let mut files = self.lock();
        let slot = files
            .entry(FileKey::of(file))
            .or_default()
            .entry(chunk)
            .or_default();
        if dirty {
            slot.dirty.insert(file.id(), entry);
        } else {
            slot.clean = Some(entry);
        }
        Ok(())
    }

    fn flush_file(&self, file: &dyn FileHandle) -> ShardResult<()> {
        let handle = file.id();
        let mut files = self.lock();
        let Some(chunks) = files.get_mut(&FileKey::of(file)) else {
            return Ok(());
        };
        let mut promoted = 0usize;
        for slot in chunks.values_mut() {
            if let Some(entry) = slot.dirty.remove(&handle) {
                if self.fresh(&entry) {
                    slot.clean = Some(entry);
                    promoted += 1;
                }
            }
        }
        chunks.retain(|_, slot| !slot.is_empty());
        tracing::debug!(path = %file.path(), promoted, "flushed dirty chunks");
        Ok(())
    }

    fn cut_file_length(&self, file: &dyn FileHandle, new_length: u64) -> ShardResult<()> {
        let mut files = self.lock();
        let Some(chunks) = files.get_mut(&FileKey::of(file)) else {
            return Ok(());
        };
        let last = if new_length == 0 {
            None
        } else {
            Some((new_length - 1) / self.chunk_size as u64)
        };
        for (index, slot) in chunks.iter_mut() {
            if last.map_or(true, |last| *index > last) {
                slot.clean = None;
            }
        }
        chunks.retain(|_, slot| !slot.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UploadSink;
    use shard_core::SeededRandom;
    use std::thread;

    struct TestHandle {
        id: HandleId,
        backend: BackendId,
        path: String,
    }

    impl TestHandle {
        fn new(seed: u64, path: &str) -> Self {
            let rng = SeededRandom::new(seed);
            Self {
                id: HandleId::generate(&rng),
                backend: BackendId::from_bytes([7; 16]),
                path: path.to_string(),
            }
        }
    }

    impl FileHandle for TestHandle {
        fn id(&self) -> HandleId {
            self.id
        }
        fn backend_id(&self) -> BackendId {
            self.backend
        }
        fn path(&self) -> &str {
            &self.path
        }
        fn length(&self) -> u64 {
            0
        }
        fn exists(&self) -> bool {
            false
        }
        fn is_writable(&self) -> bool {
            true
        }
        fn fetch_range(&self, _offset: u64, _size: usize) -> ShardResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn send(&mut self, _new_length: u64) -> ShardResult<Box<dyn UploadSink>> {
            Err(ShardError::Configuration("test handle".into()))
        }
        fn mark_committed(&mut self, _new_length: u64) {}
    }

    fn cache() -> MemoryChunkCache {
        MemoryChunkCache::new(4, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_dirty_visible_only_to_owner() {
        let c = cache();
        let h1 = TestHandle::new(1, "f");
        let h2 = TestHandle::new(2, "f");

        c.put(&h1, 0, b"cln0", false, false).unwrap();
        c.put(&h1, 0, b"drt0", false, true).unwrap();

        let own = c.try_fetch(&h1, 0).unwrap();
        assert_eq!(own.data, b"drt0");
        assert!(own.dirty);
        assert_eq!(c.try_fetch(&h2, 0).unwrap().data, b"cln0");

        c.put(&h1, 1, b"zz", true, true).unwrap();
        assert!(c.try_fetch(&h2, 1).is_none(), "other handle must miss");
    }

    #[test]
    fn test_flush_promotes_to_clean() {
        let c = cache();
        let h1 = TestHandle::new(1, "f");
        let h2 = TestHandle::new(2, "f");
        c.put(&h1, 0, b"old!", false, false).unwrap();
        c.put(&h1, 0, b"new!", false, true).unwrap();
        c.flush_file(&h1).unwrap();

        let seen = c.try_fetch(&h2, 0).unwrap();
        assert_eq!(seen.data, b"new!");
        assert!(!seen.dirty);
        assert_eq!(c.entry_count(), 1, "dirty entry replaced the clean one");
    }

    #[test]
    fn test_flush_leaves_other_handles_dirty() {
        let c = cache();
        let h1 = TestHandle::new(1, "f");
        let h2 = TestHandle::new(2, "f");
        c.put(&h2, 0, b"h2h2", false, true).unwrap();
        c.flush_file(&h1).unwrap();
        assert!(c.try_fetch(&h2, 0).unwrap().dirty);
        assert!(c.try_fetch(&h1, 0).is_none());
    }

    #[test]
    fn test_cut_removes_clean_beyond_length_only() {
        let c = cache();
        let h = TestHandle::new(1, "f");
        for i in 0..4 {
            c.put(&h, i, b"aaaa", false, false).unwrap();
        }
        c.put(&h, 3, b"dddd", false, true).unwrap();

        c.cut_file_length(&h, 6).unwrap();
        assert!(c.try_fetch(&h, 0).is_some());
        assert!(c.try_fetch(&h, 1).is_some());
        let other = TestHandle::new(2, "f");
        assert!(c.try_fetch(&other, 2).is_none());
        assert!(c.try_fetch(&other, 3).is_none());
        assert_eq!(
            c.try_fetch(&h, 3).unwrap().data,
            b"dddd",
            "dirty chunks survive a cut"
        );

        c.cut_file_length(&h, 0).unwrap();
        assert!(c.try_fetch(&other, 0).is_none());
    }

    #[test]
    fn test_put_validation() {
        let c = cache();
        let h = TestHandle::new(1, "f");
        assert!(matches!(c.put(&h, 0, b"", true, false), Err(ShardError::Range(_))));
        assert!(matches!(c.put(&h, 0, b"abc", false, false), Err(ShardError::Range(_))));
        assert!(matches!(c.put(&h, 0, b"abcde", true, false), Err(ShardError::Range(_))));
        c.put(&h, 0, b"abc", true, false).unwrap();
    }

    #[test]
    fn test_paths_differing_in_case_are_separate_files() {
        let c = cache();
        let upper = TestHandle::new(1, "docs/Report.bin");
        let lower = TestHandle::new(2, "docs/report.bin");
        c.put(&upper, 0, b"AAAA", false, false).unwrap();
        assert!(c.try_fetch(&lower, 0).is_none());

        c.put(&lower, 0, b"BBBB", false, false).unwrap();
        c.cut_file_length(&lower, 0).unwrap();
        assert!(c.try_fetch(&lower, 0).is_none());
        assert_eq!(c.try_fetch(&upper, 0).unwrap().data, b"AAAA");
    }

    #[test]
    fn test_ttl_expiry() {
        let c = MemoryChunkCache::new(4, Duration::from_millis(50)).unwrap();
        let h = TestHandle::new(1, "f");
        c.put(&h, 0, b"abcd", false, false).unwrap();
        c.put(&h, 1, b"efgh", false, true).unwrap();
        assert!(c.try_fetch(&h, 0).is_some());

        thread::sleep(Duration::from_millis(80));
        assert!(c.try_fetch(&h, 0).is_none());
        assert!(c.try_fetch(&h, 1).is_none());

        // stale dirty entries are dropped, not promoted
        c.put(&h, 2, b"ijkl", false, true).unwrap();
        thread::sleep(Duration::from_millis(80));
        c.flush_file(&h).unwrap();
        assert!(c.try_fetch(&h, 2).is_none());
    }

    #[test]
    fn test_concurrent_writers_stay_isolated() {
        let c = std::sync::Arc::new(cache());
        let workers: Vec<_> = (0..4u8)
            .map(|n| {
                let c = c.clone();
                thread::spawn(move || {
                    let h = TestHandle::new(n as u64 + 10, "shared");
                    for chunk in 0..16 {
                        c.put(&h, chunk, &[n; 4], false, true).unwrap();
                    }
                    for chunk in 0..16 {
                        assert_eq!(c.try_fetch(&h, chunk).unwrap().data, vec![n; 4]);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(MemoryChunkCache::new(0, Duration::from_secs(1)).is_err());
    }
}
