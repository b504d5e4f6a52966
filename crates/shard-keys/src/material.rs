//! Circular-offset secret buffers.
//!
//! Logical byte `i` lives at `raw[(start + i) mod len]`. Two buffers holding
//! identical raw bytes with different start offsets yield different keys.

use std::fmt;

use shard_core::{RandomSource, ShardError, ShardResult};

/// Length of freshly generated material; with the 2-byte offset the
/// serialized payload is 512 bytes.
pub const DEFAULT_MATERIAL_LEN: usize = 510;

#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    raw: Vec<u8>,
    start: u16,
}

impl KeyMaterial {
    pub fn new(raw: Vec<u8>, start: u16) -> ShardResult<Self> {
        if raw.is_empty() {
            return Err(ShardError::Range("key material cannot be empty".into()));
        }
        Ok(Self { raw, start })
    }

    pub fn create_random(len: usize, rng: &dyn RandomSource) -> ShardResult<Self> {
        let mut raw = vec![0u8; len];
        rng.fill(&mut raw);
        Self::new(raw, rng.next_u16())
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn physical(&self, index: usize) -> usize {
        let len = self.raw.len();
        (self.start as usize % len + index % len) % len
    }

    fn check_index(&self, index: usize) -> ShardResult<()> {
        if index >= self.raw.len() {
            return Err(ShardError::Range(format!(
                "index {index} out of range for {} bytes of key material",
                self.raw.len()
            )));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> ShardResult<u8> {
        self.check_index(index)?;
        Ok(self.raw[self.physical(index)])
    }

    pub fn set(&mut self, index: usize, value: u8) -> ShardResult<()> {
        self.check_index(index)?;
        let at = self.physical(index);
        self.raw[at] = value;
        Ok(())
    }

    /// `count` logical bytes starting at logical `offset`, wrapping around.
    pub fn extract(&self, offset: usize, count: usize) -> ShardResult<Vec<u8>> {
        if count > self.raw.len() {
            return Err(ShardError::Range(format!(
                "cannot extract {count} bytes from {} bytes of key material",
                self.raw.len()
            )));
        }
        Ok((0..count)
            .map(|i| self.raw[self.physical(offset % self.raw.len() + i)])
            .collect())
    }

    pub fn to_logical_bytes(&self) -> Vec<u8> {
        (0..self.raw.len()).map(|i| self.raw[self.physical(i)]).collect()
    }

    pub(crate) fn xor_logical(&mut self, other: &KeyMaterial) {
        for i in 0..self.raw.len() {
            let at = self.physical(i);
            self.raw[at] ^= other.raw[other.physical(i)];
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.raw.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
