//! Injectable randomness.
//!
//! Padding bytes, IVs, salts, key material and identifiers all come from a
//! `RandomSource` handed in by the caller, so tests can run deterministically.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::sync::{Mutex, PoisonError};

pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]);

    fn next_u16(&self) -> u16 {
        let mut buf = [0u8; 2];
        self.fill(&mut buf);
        u16::from_le_bytes(buf)
    }
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Seeded generator for reproducible tests. Not for production keys.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill(&self, dest: &mut [u8]) {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(dest);
    }
}
