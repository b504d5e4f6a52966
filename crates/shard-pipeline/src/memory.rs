//! In-memory dataset: the result side of every connected transform.
//!
//! Producers `write` bytes and `finish` items; each registered consumer gets
//! its own split into blocks of its block size, with its own padding applied
//! to the partial tail when the item finishes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::count::ItemCount;
use crate::dataset::{
    check_registration, duplicate_consumer, unknown_consumer, ConsumerToken, Dataset,
};
use crate::padding::Padding;

pub struct MemoryDataset {
    count: ItemCount,
    state: RefCell<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    consumers: HashMap<ConsumerToken, MemoryConsumer>,
    finished: HashSet<usize>,
    written: bool,
}

struct MemoryConsumer {
    block_size: usize,
    padding: Arc<dyn Padding>,
    items: HashMap<usize, ItemQueue>,
}

#[derive(Default)]
struct ItemQueue {
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    ended: bool,
}

impl MemoryDataset {
    pub fn new(count: Option<usize>) -> Self {
        Self {
            count: match count {
                Some(n) => ItemCount::known(n),
                None => ItemCount::unknown(),
            },
            state: RefCell::new(MemoryState::default()),
        }
    }

    /// Dataset whose count tracks `source`: adopted now if known, otherwise
    /// resolved when the source resolves.
    pub fn following(source: &dyn Dataset) -> Rc<Self> {
        let known = source.count();
        let dataset = Rc::new(Self::new(known));
        if known.is_none() {
            let weak = Rc::downgrade(&dataset);
            source.on_count_resolved(Box::new(move |count| {
                if let Some(dataset) = weak.upgrade() {
                    if let Err(e) = dataset.resolve_count(count) {
                        tracing::warn!("chained dataset count mismatch: {e}");
                    }
                }
            }));
        }
        dataset
    }

    pub fn resolve_count(&self, count: usize) -> ShardResult<()> {
        self.count.resolve(count)
    }

    pub fn write(&self, item: usize, data: &[u8]) -> ShardResult<()> {
        self.count.check_item(item)?;
        let mut state = self.state.borrow_mut();
        if state.finished.contains(&item) {
            return Err(ShardError::Configuration(format!(
                "item {item} is already finished"
            )));
        }
        state.written = true;
        for consumer in state.consumers.values_mut() {
            let block_size = consumer.block_size;
            let queue = consumer.items.entry(item).or_default();
            queue.partial.extend_from_slice(data);
            while queue.partial.len() >= block_size {
                let rest = queue.partial.split_off(block_size);
                let block = std::mem::replace(&mut queue.partial, rest);
                queue.ready.push_back(block);
            }
        }
        Ok(())
    }

    /// Flush every consumer's partial tail through its padding and mark the
    /// item complete. Finishing twice is a no-op.
    pub fn finish(&self, item: usize) -> ShardResult<()> {
        self.count.check_item(item)?;
        let mut state = self.state.borrow_mut();
        if state.finished.contains(&item) {
            return Ok(());
        }
        state.written = true;
        for consumer in state.consumers.values_mut() {
            let queue = consumer.items.entry(item).or_default();
            let tail = std::mem::take(&mut queue.partial);
            let lines = consumer.padding.pad(&tail, consumer.block_size)?;
            queue
                .ready
                .extend(lines.into_iter().filter(|line| !line.is_empty()));
        }
        state.finished.insert(item);
        Ok(())
    }

    pub fn is_finished(&self, item: usize) -> bool {
        self.state.borrow().finished.contains(&item)
    }
}

impl Dataset for MemoryDataset {
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
        if state.written {
            return Err(ShardError::Configuration(
                "cannot register a consumer after data has been written".into(),
            ));
        }
        state.consumers.insert(
            token,
            MemoryConsumer {
                block_size,
                padding,
                items: HashMap::new(),
            },
        );
        Ok(())
    }

    fn next_block(&self, token: ConsumerToken, item: usize) -> ShardResult<Option<Vec<u8>>> {
        self.count.check_item(item)?;
        let mut state = self.state.borrow_mut();
        let finished = state.finished.contains(&item);
        let consumer = state
            .consumers
            .get_mut(&token)
            .ok_or_else(|| unknown_consumer(token))?;
        let queue = consumer.items.entry(item).or_default();
        if queue.ended {
            return Ok(None);
        }
        if let Some(block) = queue.ready.pop_front() {
            return Ok(Some(block));
        }
        if finished {
            queue.ended = true;
            return Ok(None);
        }
        Ok(Some(Vec::new()))
    }
}
