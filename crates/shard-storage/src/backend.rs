use std::io::Write;

use shard_core::{ShardError, ShardResult};
use shard_pipeline::source::ReadSeek;

/// Writable upload stream. Nothing is visible remotely until `commit`.
pub trait UploadSink: Write {
    fn commit(self: Box<Self>) -> ShardResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Storage backend contract. Paths are `/`-separated and relative to the
/// backend's root; see [`normalize_path`].
pub trait CloudStorage: Send + Sync {
    fn name(&self) -> &str;

    fn directory_exists(&self, path: &str) -> ShardResult<bool>;

    /// Creates missing ancestors too.
    fn create_directory(&self, path: &str) -> ShardResult<()>;

    fn file_exists(&self, path: &str) -> ShardResult<bool>;

    /// Direct children of `dir`. `NotFound` if the directory does not exist.
    fn list(&self, dir: &str) -> ShardResult<Vec<EntryInfo>>;

    fn file_size(&self, path: &str) -> ShardResult<u64>;

    fn read_all(&self, path: &str) -> ShardResult<Vec<u8>>;

    /// Up to `len` bytes at `offset`; shorter at end of file.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> ShardResult<Vec<u8>>;

    /// Replaces the file, creating parent directories as needed.
    fn write_all(&self, path: &str, data: &[u8]) -> ShardResult<()>;

    fn open_read(&self, path: &str) -> ShardResult<Box<dyn ReadSeek>>;

    /// Upload sink for exactly `length` bytes.
    fn open_write(&self, path: &str, length: u64) -> ShardResult<Box<dyn UploadSink>>;
}

/// Collapse separators, drop `.` segments, reject `..`.
pub fn normalize_path(path: &str) -> ShardResult<String> {
    let mut parts = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(ShardError::Range(format!(
                    "path escapes the storage root: {path}"
                )))
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// `parent/child` with normalisation.
pub fn join_path(parent: &str, child: &str) -> ShardResult<String> {
    normalize_path(&format!("{parent}/{child}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize_path("a\\b").unwrap(), "a/b");
        assert_eq!(normalize_path("").unwrap(), "");
        assert!(matches!(normalize_path("a/../b"), Err(ShardError::Range(_))));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("root/", "/x").unwrap(), "root/x");
    }
}
