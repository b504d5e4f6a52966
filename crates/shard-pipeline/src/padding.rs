//! Padding strategies applied at the consumer-registration boundary.
//!
//! `pad` receives the final partial block of an item (`0 <= len < block_size`)
//! and returns the lines to emit in its place. `unpad` receives the last
//! `unpad_batch()` lines of a padded stream and returns them trimmed.
//!
//! Random padding layout (one or two lines):
//! ```text
//! [ data (L) | random noise (padLength) | stored: u16 BE ]
//! stored % block_size == padLength, higher bits random
//! ```

use std::fmt;
use std::sync::Arc;

use shard_core::{OsRandom, RandomSource, ShardError, ShardResult};

pub trait Padding: Send + Sync + fmt::Debug {
    /// Registry name, persisted in encryption-set catalogs
    fn name(&self) -> &'static str;

    fn pad(&self, tail: &[u8], block_size: usize) -> ShardResult<Vec<Vec<u8>>>;

    fn unpad(&self, lines: Vec<Vec<u8>>, block_size: usize) -> ShardResult<Vec<Vec<u8>>>;

    /// Number of trailing lines `unpad` needs to see
    fn unpad_batch(&self) -> usize;

    fn is_reversible(&self) -> bool {
        true
    }

    fn min_block_size(&self) -> usize {
        1
    }
}

fn check_tail(tail: &[u8], block_size: usize) -> ShardResult<()> {
    if tail.len() >= block_size {
        return Err(ShardError::Range(format!(
            "final block of {} bytes does not fit block size {block_size}",
            tail.len()
        )));
    }
    Ok(())
}

/// Passes the final partial block through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPadding;

impl Padding for NoPadding {
    fn name(&self) -> &'static str {
        "NoPadding"
    }

    fn pad(&self, tail: &[u8], block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        if tail.len() > block_size {
            return Err(ShardError::Range(format!(
                "final block of {} bytes exceeds block size {block_size}",
                tail.len()
            )));
        }
        if tail.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![tail.to_vec()])
    }

    fn unpad(&self, lines: Vec<Vec<u8>>, _block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        Ok(lines)
    }

    fn unpad_batch(&self) -> usize {
        0
    }
}

/// Fills the final block with zeros. Write-only: the original length is lost.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroPadding;

impl Padding for ZeroPadding {
    fn name(&self) -> &'static str {
        "ZeroPadding"
    }

    fn pad(&self, tail: &[u8], block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        check_tail(tail, block_size)?;
        if tail.is_empty() {
            return Ok(Vec::new());
        }
        let mut line = vec![0u8; block_size];
        line[..tail.len()].copy_from_slice(tail);
        Ok(vec![line])
    }

    fn unpad(&self, _lines: Vec<Vec<u8>>, _block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        Err(ShardError::Format(
            "zero padding cannot be removed: the original length is not recorded".into(),
        ))
    }

    fn unpad_batch(&self) -> usize {
        0
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

/// Largest block size whose pad length still fits the 16-bit trailer.
pub const RANDOM_PADDING_MAX_BLOCK: usize = 1 << 16;

const CAMOUFLAGE_ATTEMPTS: usize = 8;

/// Reversible padding with random fill and a camouflaged length trailer.
#[derive(Clone)]
pub struct RandomPadding {
    rng: Arc<dyn RandomSource>,
}

impl RandomPadding {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self { rng }
    }

    /// Random 16-bit value congruent to `pad_len` modulo `block_size`.
    fn camouflage(&self, pad_len: usize, block_size: usize) -> u16 {
        for _ in 0..CAMOUFLAGE_ATTEMPTS {
            let r = self.rng.next_u16() as usize;
            let stored = r - r % block_size + pad_len;
            if stored <= u16::MAX as usize {
                return stored as u16;
            }
        }
        // pad_len < block_size <= 65536, and pad_len itself is always a valid residue
        pad_len as u16
    }
}

impl Default for RandomPadding {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom))
    }
}

impl fmt::Debug for RandomPadding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomPadding").finish_non_exhaustive()
    }
}

impl Padding for RandomPadding {
    fn name(&self) -> &'static str {
        "RandomPadding"
    }

    fn pad(&self, tail: &[u8], block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        if !(2..=RANDOM_PADDING_MAX_BLOCK).contains(&block_size) {
            return Err(ShardError::Range(format!(
                "random padding needs a block size in 2..={RANDOM_PADDING_MAX_BLOCK}, got {block_size}"
            )));
        }
        check_tail(tail, block_size)?;

        let lines = if tail.len() < block_size - 1 { 1 } else { 2 };
        let total = block_size * lines;
        let pad_len = total - 2 - tail.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(tail);
        let mut noise = vec![0u8; pad_len];
        self.rng.fill(&mut noise);
        out.extend_from_slice(&noise);
        out.extend_from_slice(&self.camouflage(pad_len, block_size).to_be_bytes());

        Ok(out.chunks(block_size).map(<[u8]>::to_vec).collect())
    }

    fn unpad(&self, lines: Vec<Vec<u8>>, block_size: usize) -> ShardResult<Vec<Vec<u8>>> {
        if block_size < 2 {
            return Err(ShardError::Range(format!(
                "random padding needs a block size of at least 2, got {block_size}"
            )));
        }
        let joined = lines.concat();
        let len = joined.len();
        if len < 2 {
            return Err(ShardError::Format(format!(
                "insufficient unpad batch: {len} bytes cannot hold a pad trailer"
            )));
        }
        let stored = u16::from_be_bytes([joined[len - 2], joined[len - 1]]) as usize;
        let pad_len = stored % block_size;
        if len < pad_len + 2 {
            return Err(ShardError::Format(format!(
                "insufficient unpad batch: pad length {pad_len} needs {} bytes, have {len}",
                pad_len + 2
            )));
        }
        let keep = len - pad_len - 2;
        Ok(joined[..keep]
            .chunks(block_size)
            .map(<[u8]>::to_vec)
            .collect())
    }

    fn unpad_batch(&self) -> usize {
        2
    }

    fn min_block_size(&self) -> usize {
        2
    }
}
