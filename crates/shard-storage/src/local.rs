//! Local-directory backend: each directory stands in for one cloud.
//!
//! Uploads go to a `.part` sibling and are renamed into place on commit, so a
//! reader never observes a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use shard_core::{ShardError, ShardResult};
use shard_pipeline::source::ReadSeek;

use crate::backend::{normalize_path, CloudStorage, EntryInfo, UploadSink};

#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    name: String,
    root: PathBuf,
}

fn map_io(path: &Path, e: io::Error) -> ShardError {
    if e.kind() == io::ErrorKind::NotFound {
        ShardError::NotFound(path.display().to_string())
    } else {
        ShardError::Io(e)
    }
}

impl LocalFsBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> ShardResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| map_io(&root, e))?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> ShardResult<PathBuf> {
        let normalized = normalize_path(path)?;
        Ok(self.root.join(normalized))
    }

    fn ensure_parent(target: &Path) -> ShardResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
        }
        Ok(())
    }
}

impl CloudStorage for LocalFsBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory_exists(&self, path: &str) -> ShardResult<bool> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn create_directory(&self, path: &str) -> ShardResult<()> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target).map_err(|e| map_io(&target, e))
    }

    fn file_exists(&self, path: &str) -> ShardResult<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn list(&self, dir: &str) -> ShardResult<Vec<EntryInfo>> {
        let target = self.resolve(dir)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&target).map_err(|e| map_io(&target, e))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".part") {
                continue;
            }
            let meta = entry.metadata()?;
            entries.push(EntryInfo {
                name,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> ShardResult<u64> {
        let target = self.resolve(path)?;
        Ok(fs::metadata(&target).map_err(|e| map_io(&target, e))?.len())
    }

    fn read_all(&self, path: &str) -> ShardResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target).map_err(|e| map_io(&target, e))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> ShardResult<Vec<u8>> {
        let target = self.resolve(path)?;
        let mut file = File::open(&target).map_err(|e| map_io(&target, e))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut out = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut out)?;
        Ok(out)
    }

    fn write_all(&self, path: &str, data: &[u8]) -> ShardResult<()> {
        let mut sink = self.open_write(path, data.len() as u64)?;
        sink.write_all(data)?;
        sink.commit()
    }

    fn open_read(&self, path: &str) -> ShardResult<Box<dyn ReadSeek>> {
        let target = self.resolve(path)?;
        let file = File::open(&target).map_err(|e| map_io(&target, e))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &str, length: u64) -> ShardResult<Box<dyn UploadSink>> {
        let target = self.resolve(path)?;
        Self::ensure_parent(&target)?;
        let mut temp = target.clone().into_os_string();
        temp.push(".part");
        let temp = PathBuf::from(temp);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .map_err(|e| map_io(&temp, e))?;
        Ok(Box::new(LocalUploadSink {
            writer: BufWriter::new(file),
            temp,
            target,
            expected: length,
            written: 0,
            committed: false,
        }))
    }
}

struct LocalUploadSink {
    writer: BufWriter<File>,
    temp: PathBuf,
    target: PathBuf,
    expected: u64,
    written: u64,
    committed: bool,
}

impl Write for LocalUploadSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl UploadSink for LocalUploadSink {
    fn commit(mut self: Box<Self>) -> ShardResult<()> {
        if self.written != self.expected {
            return Err(ShardError::Backend(format!(
                "upload of {} wrote {} bytes, announced {}",
                self.target.display(),
                self.written,
                self.expected
            )));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.temp, &self.target).map_err(|e| map_io(&self.target, e))?;
        self.committed = true;
        tracing::debug!(path = %self.target.display(), bytes = self.written, "upload committed");
        Ok(())
    }
}

impl Drop for LocalUploadSink {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}
