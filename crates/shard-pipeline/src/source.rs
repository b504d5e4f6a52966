//! Reader-backed dataset: local files, remote cached streams, any `Read + Seek`.
//!
//! Every (consumer, item) pair keeps its own read position, so consumers with
//! different block sizes never see each other's progress. The first short
//! read of an item (including an empty read at EOF) goes through the
//! consumer's padding exactly once.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::count::ItemCount;
use crate::dataset::{
    check_registration, duplicate_consumer, require_count, unknown_consumer, ConsumerToken,
    Dataset,
};
use crate::padding::Padding;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

pub struct ReaderDataset {
    count: ItemCount,
    state: RefCell<ReaderState>,
}

#[derive(Default)]
struct ReaderState {
    items: Vec<ReaderItem>,
    consumers: HashMap<ConsumerToken, ReaderConsumer>,
    fixed: bool,
}

struct ReaderItem {
    name: String,
    reader: Box<dyn ReadSeek>,
    skip: u64,
}

struct ReaderConsumer {
    block_size: usize,
    padding: Arc<dyn Padding>,
    cursors: HashMap<usize, ItemCursor>,
}

#[derive(Default)]
struct ItemCursor {
    position: u64,
    /// Padded tail lines, present once EOF has been seen
    tail: Option<VecDeque<Vec<u8>>>,
}

impl ReaderDataset {
    pub fn new() -> Self {
        Self {
            count: ItemCount::unknown(),
            state: RefCell::new(ReaderState::default()),
        }
    }

    /// Add an item read from `reader`, starting `skip` bytes in.
    pub fn add_reader(
        &self,
        name: impl Into<String>,
        reader: Box<dyn ReadSeek>,
        skip: u64,
    ) -> ShardResult<usize> {
        let mut state = self.state.borrow_mut();
        if state.fixed {
            return Err(ShardError::Configuration(
                "dataset is fixed; no more items can be added".into(),
            ));
        }
        state.items.push(ReaderItem {
            name: name.into(),
            reader,
            skip,
        });
        Ok(state.items.len() - 1)
    }

    pub fn add_file(&self, path: &Path) -> ShardResult<usize> {
        let file = File::open(path)?;
        self.add_reader(path.display().to_string(), Box::new(file), 0)
    }

    /// Freeze the item list and resolve the count.
    pub fn fix(&self) -> ShardResult<usize> {
        let count = {
            let mut state = self.state.borrow_mut();
            state.fixed = true;
            state.items.len()
        };
        self.count.resolve(count)?;
        Ok(count)
    }

    pub fn item_name(&self, item: usize) -> Option<String> {
        self.state.borrow().items.get(item).map(|i| i.name.clone())
    }
}

impl Default for ReaderDataset {
    fn default() -> Self {
        Self::new()
    }
}

fn read_full(reader: &mut dyn ReadSeek, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl Dataset for ReaderDataset {
    fn count(&self) -> Option<usize> {
        self.count.get()
    }

    fn on_count_resolved(&self, listener: Box<dyn FnOnce(usize)>) {
        self.count.on_resolved(listener);
    }

    fn register_consumer(
        &self,
        token: ConsumerToken,
        block_size: usize,
        padding: Arc<dyn Padding>,
    ) -> ShardResult<()> {
        let mut state = self.state.borrow_mut();
        if state.consumers.contains_key(&token) {
            return Err(duplicate_consumer(token));
        }
        check_registration(block_size, padding.as_ref())?;
        state.consumers.insert(
            token,
            ReaderConsumer {
                block_size,
                padding,
                cursors: HashMap::new(),
            },
        );
        Ok(())
    }

    fn next_block(&self, token: ConsumerToken, item: usize) -> ShardResult<Option<Vec<u8>>> {
        require_count(self)?;
        self.count.check_item(item)?;

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let consumer = state
            .consumers
            .get_mut(&token)
            .ok_or_else(|| unknown_consumer(token))?;
        let cursor = consumer.cursors.entry(item).or_default();

        if let Some(tail) = cursor.tail.as_mut() {
            return Ok(tail.pop_front());
        }

        let source = &mut state.items[item];
        let mut block = vec![0u8; consumer.block_size];
        source
            .reader
            .seek(SeekFrom::Start(source.skip + cursor.position))?;
        let read = read_full(source.reader.as_mut(), &mut block)?;
        cursor.position += read as u64;

        if read == consumer.block_size {
            return Ok(Some(block));
        }

        block.truncate(read);
        let lines = consumer.padding.pad(&block, consumer.block_size)?;
        tracing::debug!(
            item = %source.name,
            tail = read,
            lines = lines.len(),
            "reader item reached end of stream"
        );
        let mut tail: VecDeque<Vec<u8>> = lines.into_iter().filter(|l| !l.is_empty()).collect();
        let first = tail.pop_front();
        cursor.tail = Some(tail);
        Ok(first)
    }
}
