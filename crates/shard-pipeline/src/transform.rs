//! Transforms, connected transforms and the drain contract.
//!
//! Stepping is two-phase:
//!
//! 1. Call `transform_next()` until it returns `false`. A stage that observes
//!    end of stream for an item writes all residual output for that item
//!    (cipher finalisation, held-back unpad lines) and finishes the result
//!    item within that same call. `false` means every result item is finished.
//! 2. Read the result dataset per item until `None`.
//!
//! No extra `transform_next()` call is ever required after `false`.

use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

use shard_core::{ShardError, ShardResult};

use crate::dataset::{require_count, ConsumerToken, Dataset};
use crate::memory::MemoryDataset;
use crate::padding::NoPadding;

/// Stateless stage descriptor.
pub trait Transform: Send + Sync {
    fn connect(&self, source: Rc<dyn Dataset>) -> ShardResult<Box<dyn ConnectedTransform>>;
}

/// A live stage bound to one source, owning per-item progress.
pub trait ConnectedTransform {
    fn source(&self) -> Rc<dyn Dataset>;

    fn result(&self) -> Rc<dyn Dataset>;

    /// Advance every unfinished item by one unit of work. Returns `true` while
    /// at least one result item is unfinished.
    fn transform_next(&mut self) -> ShardResult<bool>;
}

/// Ordered list of stages; connecting feeds each stage's result into the next.
#[derive(Clone, Default)]
pub struct TransformChain {
    stages: Vec<Arc<dyn Transform>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn Transform>) {
        self.stages.push(stage);
    }

    pub fn with(mut self, stage: Arc<dyn Transform>) -> Self {
        self.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Transform for TransformChain {
    fn connect(&self, source: Rc<dyn Dataset>) -> ShardResult<Box<dyn ConnectedTransform>> {
        if self.stages.is_empty() {
            return Err(ShardError::Configuration(
                "transform chain has no stages".into(),
            ));
        }
        let mut connected = Vec::with_capacity(self.stages.len());
        let mut upstream = source.clone();
        for stage in &self.stages {
            let next = stage.connect(upstream)?;
            upstream = next.result();
            connected.push(next);
        }
        Ok(Box::new(ConnectedChain::new(source, connected)))
    }
}

/// Connected stages stepped in order, upstream first.
pub struct ConnectedChain {
    source: Rc<dyn Dataset>,
    stages: Vec<Box<dyn ConnectedTransform>>,
}

impl ConnectedChain {
    pub fn new(source: Rc<dyn Dataset>, stages: Vec<Box<dyn ConnectedTransform>>) -> Self {
        Self { source, stages }
    }
}

impl ConnectedTransform for ConnectedChain {
    fn source(&self) -> Rc<dyn Dataset> {
        self.source.clone()
    }

    fn result(&self) -> Rc<dyn Dataset> {
        match self.stages.last() {
            Some(last) => last.result(),
            None => self.source.clone(),
        }
    }

    fn transform_next(&mut self) -> ShardResult<bool> {
        let mut active = false;
        for stage in &mut self.stages {
            active |= stage.transform_next()?;
        }
        Ok(active)
    }
}

/// Pull every ready block of `item` into `out`. Returns `true` once the item
/// has ended for `token`.
pub fn drain_to(
    result: &dyn Dataset,
    token: ConsumerToken,
    item: usize,
    out: &mut dyn Write,
) -> ShardResult<bool> {
    loop {
        match result.next_block(token, item)? {
            None => return Ok(true),
            Some(block) if block.is_empty() => return Ok(false),
            Some(block) => out.write_all(&block)?,
        }
    }
}

/// Register a passthrough consumer on the result, step to completion and
/// collect every item's output. Must run before anything is written to the
/// result dataset.
pub fn run_to_completion(
    connected: &mut dyn ConnectedTransform,
    block_size: usize,
) -> ShardResult<Vec<Vec<u8>>> {
    let result = connected.result();
    let token = ConsumerToken::new();
    result.register_consumer(token, block_size, Arc::new(NoPadding))?;

    let mut outputs: Vec<Vec<u8>> = Vec::new();
    let mut ended: Vec<bool> = Vec::new();
    loop {
        let more = connected.transform_next()?;
        let count = require_count(result.as_ref())?;
        outputs.resize_with(count, Vec::new);
        ended.resize(count, false);
        for item in 0..count {
            if !ended[item] {
                ended[item] = drain_to(result.as_ref(), token, item, &mut outputs[item])?;
            }
        }
        if !more {
            break;
        }
    }
    if let Some(item) = ended.iter().position(|done| !done) {
        return Err(ShardError::Format(format!(
            "item {item} still open after the pipeline reported completion"
        )));
    }
    Ok(outputs)
}

/// Stream one item of a connected pipeline into `out`; other items are
/// stepped but not consumed. Returns the number of bytes written.
pub fn stream_item_to(
    connected: &mut dyn ConnectedTransform,
    item: usize,
    block_size: usize,
    out: &mut dyn Write,
) -> ShardResult<u64> {
    let result = connected.result();
    let token = ConsumerToken::new();
    result.register_consumer(token, block_size, Arc::new(NoPadding))?;

    let mut counter = CountingWriter { inner: out, written: 0 };
    let mut ended = false;
    loop {
        let more = connected.transform_next()?;
        if !ended {
            ended = drain_to(result.as_ref(), token, item, &mut counter)?;
        }
        if !more {
            break;
        }
    }
    if !ended {
        return Err(ShardError::Format(format!(
            "item {item} still open after the pipeline reported completion"
        )));
    }
    Ok(counter.written)
}

/// Run `transform` over in-memory inputs, one item per input.
pub fn transform_items(transform: &dyn Transform, inputs: &[&[u8]]) -> ShardResult<Vec<Vec<u8>>> {
    let source = Rc::new(MemoryDataset::new(Some(inputs.len())));
    let mut connected = transform.connect(source.clone())?;
    for (item, input) in inputs.iter().enumerate() {
        source.write(item, input)?;
        source.finish(item)?;
    }
    run_to_completion(connected.as_mut(), DEFAULT_OUTPUT_BLOCK)
}

/// Output block size used by the convenience drivers.
pub const DEFAULT_OUTPUT_BLOCK: usize = 64 * 1024;

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Copies each block and appends a marker byte when the source ends.
    struct Marker(u8);

    struct ConnectedMarker {
        marker: u8,
        token: ConsumerToken,
        source: Rc<dyn Dataset>,
        result: Rc<MemoryDataset>,
        done: Vec<bool>,
    }

    impl Transform for Marker {
        fn connect(&self, source: Rc<dyn Dataset>) -> ShardResult<Box<dyn ConnectedTransform>> {
            let token = ConsumerToken::new();
            source.register_consumer(token, 2, Arc::new(NoPadding))?;
            let result = MemoryDataset::following(source.as_ref());
            Ok(Box::new(ConnectedMarker {
                marker: self.0,
                token,
                source,
                result,
                done: Vec::new(),
            }))
        }
    }

    impl ConnectedTransform for ConnectedMarker {
        fn source(&self) -> Rc<dyn Dataset> {
            self.source.clone()
        }

        fn result(&self) -> Rc<dyn Dataset> {
            self.result.clone()
        }

        fn transform_next(&mut self) -> ShardResult<bool> {
            let count = require_count(self.source.as_ref())?;
            self.done.resize(count, false);
            let mut active = false;
            for item in 0..count {
                if self.done[item] {
                    continue;
                }
                match self.source.next_block(self.token, item)? {
                    Some(block) => self.result.write(item, &block)?,
                    None => {
                        self.result.write(item, &[self.marker])?;
                        self.result.finish(item)?;
                        self.done[item] = true;
                    }
                }
                active |= !self.done[item];
            }
            Ok(active)
        }
    }

    #[test]
    fn test_chain_flushes_residual_output_before_false() {
        let chain = TransformChain::new()
            .with(Arc::new(Marker(b'!')))
            .with(Arc::new(Marker(b'?')));
        let out = transform_items(&chain, &[b"abcde", b""]).unwrap();
        assert_eq!(out[0], b"abcde!?".to_vec());
        assert_eq!(out[1], b"!?".to_vec());
    }

    #[test]
    fn test_no_extra_step_after_false() {
        let source = Rc::new(MemoryDataset::new(Some(1)));
        let mut connected = Marker(b'#').connect(source.clone()).unwrap();
        let result = connected.result();
        let token = ConsumerToken::new();
        result
            .register_consumer(token, 64, Arc::new(NoPadding))
            .unwrap();
        source.write(0, b"xyz").unwrap();
        source.finish(0).unwrap();

        let mut steps = 0;
        while connected.transform_next().unwrap() {
            steps += 1;
            assert!(steps < 100, "pipeline failed to terminate");
        }
        let mut out = Vec::new();
        assert!(drain_to(result.as_ref(), token, 0, &mut out).unwrap());
        assert_eq!(out, b"xyz#".to_vec());

        // Further steps are harmless and produce nothing new
        assert!(!connected.transform_next().unwrap());
    }

    #[test]
    fn test_stream_item_to_counts_bytes() {
        let source = Rc::new(MemoryDataset::new(Some(2)));
        let mut connected = Marker(b'.').connect(source.clone()).unwrap();
        source.write(0, b"first").unwrap();
        source.write(1, b"second").unwrap();
        source.finish(0).unwrap();
        source.finish(1).unwrap();

        let mut out = Vec::new();
        let written = stream_item_to(connected.as_mut(), 1, 4, &mut out).unwrap();
        assert_eq!(out, b"second.".to_vec());
        assert_eq!(written, 7);
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let source: Rc<dyn Dataset> = Rc::new(MemoryDataset::new(Some(1)));
        assert!(matches!(
            TransformChain::new().connect(source),
            Err(ShardError::Configuration(_))
        ));
    }
}
