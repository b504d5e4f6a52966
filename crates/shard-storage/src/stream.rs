//! Seekable read/write view over a remote file, backed by the chunk cache.
//!
//! Writes only ever land in the cache as dirty chunks owned by this stream's
//! handle. [`CachedFileStream::flush`] uploads the whole logical file and then
//! publishes those chunks as clean.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::cache::ChunkCache;
use crate::handle::FileHandle;

/// Transport flush interval during upload, in chunks.
const FLUSH_EVERY_CHUNKS: u64 = 2;

pub struct CachedFileStream {
    handle: Box<dyn FileHandle>,
    cache: Arc<dyn ChunkCache>,
    chunk_size: u64,
    length: u64,
    position: u64,
    modified: bool,
}

impl CachedFileStream {
    pub fn open(handle: Box<dyn FileHandle>, cache: Arc<dyn ChunkCache>) -> Self {
        let chunk_size = cache.chunk_size() as u64;
        let length = handle.length();
        Self {
            handle,
            cache,
            chunk_size,
            length,
            position: 0,
            modified: false,
        }
    }

    /// Stream that replaces the file: starts empty, drops cached clean chunks
    /// of the old content, and uploads on flush even if nothing was written.
    pub fn create(handle: Box<dyn FileHandle>, cache: Arc<dyn ChunkCache>) -> ShardResult<Self> {
        cache.cut_file_length(handle.as_ref(), 0)?;
        let mut stream = Self::open(handle, cache);
        stream.length = 0;
        stream.modified = true;
        Ok(stream)
    }

    pub fn handle(&self) -> &dyn FileHandle {
        self.handle.as_ref()
    }

    /// Logical length, including unflushed writes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    fn chunk_count(&self) -> u64 {
        self.length.div_ceil(self.chunk_size)
    }

    /// Bytes chunk `index` should hold for a file of `length` bytes.
    fn expected_len(&self, index: u64, length: u64) -> usize {
        let start = index * self.chunk_size;
        length.saturating_sub(start).min(self.chunk_size) as usize
    }

    /// Remote bytes of chunk `index`, limited to what the remote file holds.
    fn fetch_remote(&self, index: u64) -> ShardResult<Vec<u8>> {
        let start = index * self.chunk_size;
        let available = self.expected_len(index, self.handle.length());
        if available == 0 {
            return Ok(Vec::new());
        }
        self.handle.fetch_range(start, available)
    }

    /// Chunk image for `index` at the current logical length: cache first,
    /// then remote (populating a clean entry), zero-extended.
    fn load_chunk(&self, index: u64) -> ShardResult<Vec<u8>> {
        let expected = self.expected_len(index, self.length);
        let mut data = match self.cache.try_fetch(self.handle.as_ref(), index) {
            Some(hit) => hit.data,
            None => {
                let data = self.fetch_remote(index)?;
                let remote_len = self.handle.length();
                let is_last = index * self.chunk_size + data.len() as u64 >= remote_len;
                if !data.is_empty() {
                    if let Err(e) = self
                        .cache
                        .put(self.handle.as_ref(), index, &data, is_last, false)
                    {
                        tracing::debug!(path = %self.handle.path(), chunk = index, "not caching fetched chunk: {e}");
                    }
                }
                data
            }
        };
        data.resize(expected, 0);
        Ok(data)
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> ShardResult<usize> {
        if offset >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let wanted = (self.length - offset).min(buf.len() as u64) as usize;
        let mut done = 0usize;
        while done < wanted {
            let pos = offset + done as u64;
            let index = pos / self.chunk_size;
            let within = (pos % self.chunk_size) as usize;
            let chunk = self.load_chunk(index)?;
            let take = (chunk.len() - within).min(wanted - done);
            buf[done..done + take].copy_from_slice(&chunk[within..within + take]);
            done += take;
        }
        Ok(done)
    }

    /// Write `data` at `offset`, growing the logical length as needed.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> ShardResult<()> {
        if !self.handle.is_writable() {
            return Err(ShardError::Configuration(format!(
                "{} was opened read-only",
                self.handle.path()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| ShardError::Range("write past the addressable range".into()))?;

        // The old last chunk may now sit in the middle of the file; rewrite
        // it at full size so the cache never holds a short non-last chunk.
        let old_last = self.chunk_count().checked_sub(1);
        self.length = self.length.max(end);
        if let Some(old_last) = old_last {
            if old_last < offset / self.chunk_size {
                let image = self.load_chunk(old_last)?;
                self.store_dirty(old_last, &image)?;
            }
        }

        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let index = pos / self.chunk_size;
            let within = (pos % self.chunk_size) as usize;
            let mut image = self.load_chunk(index)?;
            let take = (image.len() - within).min(data.len() - done);
            image[within..within + take].copy_from_slice(&data[done..done + take]);
            self.store_dirty(index, &image)?;
            done += take;
        }
        self.modified = true;
        Ok(())
    }

    fn store_dirty(&self, index: u64, image: &[u8]) -> ShardResult<()> {
        let is_last = index + 1 == self.chunk_count();
        self.cache.put(self.handle.as_ref(), index, image, is_last, true)
    }

    /// Upload the full logical file and publish this handle's chunks.
    pub fn flush(&mut self) -> ShardResult<()> {
        if !self.modified {
            return Ok(());
        }
        self.cache.flush_file(self.handle.as_ref())?;

        let length = self.length;
        let chunks = self.chunk_count();
        let mut sink = self.handle.send(length)?;
        for index in 0..chunks {
            let expected = self.expected_len(index, length);
            let mut data = match self.cache.try_fetch(self.handle.as_ref(), index) {
                Some(hit) => hit.data,
                None => self.fetch_remote(index)?,
            };
            data.resize(expected, 0);
            sink.write_all(&data)?;
            if (index + 1) % FLUSH_EVERY_CHUNKS == 0 {
                sink.flush()?;
            }
        }
        sink.flush()?;
        sink.commit()?;

        self.handle.mark_committed(length);
        self.cache.cut_file_length(self.handle.as_ref(), length)?;
        self.modified = false;
        tracing::debug!(path = %self.handle.path(), length, chunks, "uploaded cached file");
        Ok(())
    }
}

fn to_io(err: ShardError) -> io::Error {
    match err {
        ShardError::Io(e) => e,
        ShardError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
        other => io::Error::other(other),
    }
}

impl Read for CachedFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.position, buf).map_err(to_io)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for CachedFileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(self.position, buf).map_err(to_io)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        CachedFileStream::flush(self).map_err(to_io)
    }
}

impl Seek for CachedFileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.length.checked_add_signed(d),
            SeekFrom::Current(d) => self.position.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.position = target;
        Ok(target)
    }
}
