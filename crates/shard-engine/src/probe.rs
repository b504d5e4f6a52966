//! Integrity probe: random bytes followed by their SHA-512 digest.

use sha2::{Digest, Sha512};

use shard_core::{RandomSource, ShardError, ShardResult};

pub const DIGEST_LEN: usize = 64;

/// Plaintext probe of `len` random bytes plus digest.
pub fn build(len: usize, rng: &dyn RandomSource) -> Vec<u8> {
    let mut probe = vec![0u8; len];
    rng.fill(&mut probe);
    let digest = Sha512::digest(&probe);
    probe.extend_from_slice(&digest);
    probe
}

/// Check a decrypted probe. Any mismatch is an authentication failure.
pub fn verify(plain: &[u8]) -> ShardResult<()> {
    if plain.len() < DIGEST_LEN {
        return Err(ShardError::Authentication(
            "integrity probe too short".into(),
        ));
    }
    let (body, digest) = plain.split_at(plain.len() - DIGEST_LEN);
    if Sha512::digest(body).as_slice() != digest {
        return Err(ShardError::Authentication(
            "integrity probe digest mismatch".into(),
        ));
    }
    Ok(())
}
