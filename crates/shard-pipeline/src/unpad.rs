//! Strips a reversible padding from the end of every item.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::dataset::{require_count, ConsumerToken, Dataset};
use crate::memory::MemoryDataset;
use crate::padding::{NoPadding, Padding};
use crate::transform::{ConnectedTransform, Transform};

#[derive(Debug, Clone)]
pub struct UnpadTransform {
    padding: Arc<dyn Padding>,
    block_size: usize,
}

impl UnpadTransform {
    pub fn new(padding: Arc<dyn Padding>, block_size: usize) -> Self {
        Self {
            padding,
            block_size,
        }
    }
}

impl Transform for UnpadTransform {
    fn connect(&self, source: Rc<dyn Dataset>) -> ShardResult<Box<dyn ConnectedTransform>> {
        if !self.padding.is_reversible() {
            return Err(ShardError::Configuration(format!(
                "{} cannot be removed",
                self.padding.name()
            )));
        }
        let token = ConsumerToken::new();
        source.register_consumer(token, self.block_size, Arc::new(NoPadding))?;
        let result = MemoryDataset::following(source.as_ref());
        Ok(Box::new(ConnectedUnpad {
            padding: self.padding.clone(),
            block_size: self.block_size,
            token,
            source,
            result,
            items: Vec::new(),
        }))
    }
}

#[derive(Default)]
struct UnpadItem {
    held: VecDeque<Vec<u8>>,
    finished: bool,
}

struct ConnectedUnpad {
    padding: Arc<dyn Padding>,
    block_size: usize,
    token: ConsumerToken,
    source: Rc<dyn Dataset>,
    result: Rc<MemoryDataset>,
    items: Vec<UnpadItem>,
}

impl ConnectedUnpad {
    fn step_item(&mut self, item: usize) -> ShardResult<()> {
        let batch = self.padding.unpad_batch();
        let state = &mut self.items[item];
        match self.source.next_block(self.token, item)? {
            Some(block) if block.is_empty() => {}
            Some(block) => {
                state.held.push_back(block);
                while state.held.len() > batch {
                    if let Some(line) = state.held.pop_front() {
                        self.result.write(item, &line)?;
                    }
                }
            }
            None => {
                let lines: Vec<Vec<u8>> = state.held.drain(..).collect();
                let restored = if batch == 0 {
                    lines
                } else {
                    self.padding.unpad(lines, self.block_size)?
                };
                for line in restored {
                    self.result.write(item, &line)?;
                }
                self.result.finish(item)?;
                state.finished = true;
            }
        }
        Ok(())
    }
}

impl ConnectedTransform for ConnectedUnpad {
    fn source(&self) -> Rc<dyn Dataset> {
        self.source.clone()
    }

    fn result(&self) -> Rc<dyn Dataset> {
        self.result.clone()
    }

    fn transform_next(&mut self) -> ShardResult<bool> {
        let count = require_count(self.source.as_ref())?;
        if self.items.len() < count {
            self.items.resize_with(count, UnpadItem::default);
        }
        let mut active = false;
        for item in 0..count {
            if self.items[item].finished {
                continue;
            }
            self.step_item(item)?;
            active |= !self.items[item].finished;
        }
        Ok(active)
    }
}
