//! In-memory backend for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shard_core::{ShardError, ShardResult};
use shard_pipeline::source::ReadSeek;

use crate::backend::{normalize_path, CloudStorage, EntryInfo, UploadSink};

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryState {
    fn add_ancestors(&mut self, path: &str) {
        let mut current = path;
        while let Some((parent, _)) = current.rsplit_once('/') {
            self.dirs.insert(parent.to_string());
            current = parent;
        }
    }
}

#[derive(Clone)]
pub struct MemoryStorage {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While offline every operation fails with a backend error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> ShardResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ShardError::Backend(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn lock(&self) -> ShardResult<MutexGuard<'_, MemoryState>> {
        self.check_online()?;
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CloudStorage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory_exists(&self, path: &str) -> ShardResult<bool> {
        let path = normalize_path(path)?;
        let state = self.lock()?;
        Ok(path.is_empty() || state.dirs.contains(&path))
    }

    fn create_directory(&self, path: &str) -> ShardResult<()> {
        let path = normalize_path(path)?;
        let mut state = self.lock()?;
        if !path.is_empty() {
            state.add_ancestors(&path);
            state.dirs.insert(path);
        }
        Ok(())
    }

    fn file_exists(&self, path: &str) -> ShardResult<bool> {
        let path = normalize_path(path)?;
        Ok(self.lock()?.files.contains_key(&path))
    }

    fn list(&self, dir: &str) -> ShardResult<Vec<EntryInfo>> {
        let dir = normalize_path(dir)?;
        let state = self.lock()?;
        if !dir.is_empty() && !state.dirs.contains(&dir) {
            return Err(ShardError::NotFound(dir));
        }
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let direct = |path: &str| -> Option<String> {
            let rest = path.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries: Vec<EntryInfo> = state
            .dirs
            .iter()
            .filter_map(|d| direct(d))
            .map(|name| EntryInfo {
                name,
                is_dir: true,
                size: 0,
            })
            .collect();
        entries.extend(state.files.iter().filter_map(|(path, data)| {
            direct(path).map(|name| EntryInfo {
                name,
                is_dir: false,
                size: data.len() as u64,
            })
        }));
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> ShardResult<u64> {
        let path = normalize_path(path)?;
        self.lock()?
            .files
            .get(&path)
            .map(|data| data.len() as u64)
            .ok_or(ShardError::NotFound(path))
    }

    fn read_all(&self, path: &str) -> ShardResult<Vec<u8>> {
        let path = normalize_path(path)?;
        self.lock()?
            .files
            .get(&path)
            .cloned()
            .ok_or(ShardError::NotFound(path))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> ShardResult<Vec<u8>> {
        let path = normalize_path(path)?;
        let state = self.lock()?;
        let data = state
            .files
            .get(&path)
            .ok_or_else(|| ShardError::NotFound(path.clone()))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn write_all(&self, path: &str, data: &[u8]) -> ShardResult<()> {
        let path = normalize_path(path)?;
        let mut state = self.lock()?;
        state.add_ancestors(&path);
        state.files.insert(path, data.to_vec());
        Ok(())
    }

    fn open_read(&self, path: &str) -> ShardResult<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(self.read_all(path)?)))
    }

    fn open_write(&self, path: &str, length: u64) -> ShardResult<Box<dyn UploadSink>> {
        let path = normalize_path(path)?;
        self.check_online()?;
        Ok(Box::new(MemoryUploadSink {
            storage: self.clone(),
            path,
            expected: length,
            buffer: Vec::new(),
        }))
    }
}

struct MemoryUploadSink {
    storage: MemoryStorage,
    path: String,
    expected: u64,
    buffer: Vec<u8>,
}

impl Write for MemoryUploadSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl UploadSink for MemoryUploadSink {
    fn commit(self: Box<Self>) -> ShardResult<()> {
        if self.buffer.len() as u64 != self.expected {
            return Err(ShardError::Backend(format!(
                "upload of {} wrote {} bytes, announced {}",
                self.path,
                self.buffer.len(),
                self.expected
            )));
        }
        self.storage.write_all(&self.path, &self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_and_dirs() {
        let s = MemoryStorage::new("mem");
        s.write_all("a/b/c.txt", b"abc").unwrap();
        assert!(s.directory_exists("a").unwrap());
        assert!(s.directory_exists("a/b").unwrap());
        assert!(s.file_exists("a/b/c.txt").unwrap());
        assert_eq!(s.file_size("a/b/c.txt").unwrap(), 3);
        assert_eq!(s.read_range("a/b/c.txt", 1, 10).unwrap(), b"bc");
        assert_eq!(s.read_range("a/b/c.txt", 10, 10).unwrap(), b"");
    }

    #[test]
    fn test_list_direct_children_only() {
        let s = MemoryStorage::new("mem");
        s.write_all("k/one", b"1").unwrap();
        s.write_all("k/deep/two", b"2").unwrap();
        let entries = s.list("k").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "deep");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "one");
        assert!(matches!(s.list("missing"), Err(ShardError::NotFound(_))));
    }

    #[test]
    fn test_upload_sink_commit() {
        let s = MemoryStorage::new("mem");
        let mut sink = s.open_write("up", 3).unwrap();
        sink.write_all(b"xyz").unwrap();
        assert!(!s.file_exists("up").unwrap(), "not visible before commit");
        sink.commit().unwrap();
        assert_eq!(s.read_all("up").unwrap(), b"xyz");
    }

    #[test]
    fn test_offline_fails_with_backend_error() {
        let s = MemoryStorage::new("mem");
        s.write_all("f", b"1").unwrap();
        s.set_offline(true);
        assert!(matches!(s.read_all("f"), Err(ShardError::Backend(_))));
        s.set_offline(false);
        assert_eq!(s.read_all("f").unwrap(), b"1");
    }
}
