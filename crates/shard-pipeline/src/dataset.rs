use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::padding::Padding;

/// Opaque consumer identity. Production state is tracked per (token, item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerToken(u64);

impl ConsumerToken {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConsumerToken(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConsumerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered collection of independent item streams served to any number of
/// registered consumers.
pub trait Dataset {
    /// `None` until the count is resolved.
    fn count(&self) -> Option<usize>;

    fn on_count_resolved(&self, listener: Box<dyn FnOnce(usize)>);

    /// Must precede any `next_block` for `token`.
    fn register_consumer(
        &self,
        token: ConsumerToken,
        block_size: usize,
        padding: Arc<dyn Padding>,
    ) -> ShardResult<()>;

    /// `Some(block)` with `0 <= len <= block_size`; an empty block means not
    /// ready yet. `None` is end of stream for this item and this consumer.
    fn next_block(&self, token: ConsumerToken, item: usize) -> ShardResult<Option<Vec<u8>>>;
}

/// Count of `dataset`, or a configuration error while it is unresolved.
pub fn require_count(dataset: &dyn Dataset) -> ShardResult<usize> {
    dataset.count().ok_or_else(|| {
        ShardError::Configuration("source item count is not resolved yet".into())
    })
}

pub(crate) fn check_registration(block_size: usize, padding: &dyn Padding) -> ShardResult<()> {
    if block_size == 0 || block_size < padding.min_block_size() {
        return Err(ShardError::Range(format!(
            "block size {block_size} is below the {} minimum of {}",
            padding.name(),
            padding.min_block_size().max(1)
        )));
    }
    Ok(())
}

pub(crate) fn unknown_consumer(token: ConsumerToken) -> ShardError {
    ShardError::Configuration(format!("consumer {token:?} is not registered"))
}

pub(crate) fn duplicate_consumer(token: ConsumerToken) -> ShardError {
    ShardError::Configuration(format!("consumer {token:?} is already registered"))
}
