//! Password envelopes for stored key material.
//!
//! ```text
//! [salt: 64][version: u8][AES-256-CBC(IV ‖ payload ‖ PKCS#7)]
//! wrapping key = PBKDF2-HMAC-SHA256(password, salt, iterations, 32 bytes)
//! ```
//!
//! Each blob has its own random salt. The wrapping key lives only for the
//! duration of one seal/open call.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use shard_core::{OsRandom, RandomSource, ShardError, ShardResult};
use shard_pipeline::{
    transform_items, AesCbcTransform, CipherMode, NoPadding, AES_BLOCK_SIZE, AES_KEY_SIZE,
};

use crate::container::{decode_payload, encode_payload, CONTAINER_VERSION};
use crate::material::KeyMaterial;

pub const SALT_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct EnvelopeParams {
    /// PBKDF2 iterations (default: 2048)
    pub iterations: u32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self { iterations: 2048 }
    }
}

struct WrappingKey([u8; AES_KEY_SIZE]);

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn derive_wrapping_key(
    password: &SecretString,
    salt: &[u8],
    params: &EnvelopeParams,
) -> ShardResult<WrappingKey> {
    if params.iterations == 0 {
        return Err(ShardError::Configuration(
            "PBKDF2 iteration count must be > 0".into(),
        ));
    }
    let mut key = [0u8; AES_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        params.iterations,
        &mut key,
    );
    Ok(WrappingKey(key))
}

fn run_cipher(
    key: &WrappingKey,
    mode: CipherMode,
    rng: Arc<dyn RandomSource>,
    input: &[u8],
) -> ShardResult<Vec<u8>> {
    let cipher = AesCbcTransform::new(rng)
        .with_key(&key.0)?
        .with_mode(mode)
        .with_padding(Arc::new(NoPadding));
    transform_items(&cipher, &[input])?
        .into_iter()
        .next()
        .ok_or_else(|| ShardError::Format("cipher produced no output item".into()))
}

/// Encrypt `material` under `password` into a self-contained blob.
pub fn seal(
    material: &KeyMaterial,
    password: &SecretString,
    params: &EnvelopeParams,
    rng: Arc<dyn RandomSource>,
) -> ShardResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt);
    let key = derive_wrapping_key(password, &salt, params)?;
    let ciphertext = run_cipher(&key, CipherMode::Encrypt, rng, &encode_payload(material))?;

    let mut blob = Vec::with_capacity(SALT_LEN + 1 + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.push(CONTAINER_VERSION);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`seal`]. A wrong password surfaces as a
/// `Format` error or as material that fails later verification.
pub fn open(
    blob: &[u8],
    password: &SecretString,
    params: &EnvelopeParams,
) -> ShardResult<KeyMaterial> {
    let min_len = SALT_LEN + 1 + AES_BLOCK_SIZE * 2;
    if blob.len() < min_len {
        return Err(ShardError::Format(format!(
            "key envelope too short: {} bytes, need at least {min_len}",
            blob.len()
        )));
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let version = rest[0];
    if version != CONTAINER_VERSION {
        tracing::debug!(version, "rejecting key envelope with unknown container version");
        return Err(ShardError::Format(format!(
            "unsupported key container version {version}"
        )));
    }
    let key = derive_wrapping_key(password, salt, params)?;
    let payload = run_cipher(&key, CipherMode::Decrypt, Arc::new(OsRandom), &rest[1..])?;
    decode_payload(version, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_core::SeededRandom;

    fn fast_params() -> EnvelopeParams {
        EnvelopeParams { iterations: 16 }
    }

    fn material(seed: u64) -> KeyMaterial {
        KeyMaterial::create_random(510, &SeededRandom::new(seed)).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = material(1);
        let pw = SecretString::from("correct horse");
        let blob = seal(&k, &pw, &fast_params(), Arc::new(SeededRandom::new(2))).unwrap();
        // 512-byte payload + PKCS#7 block + IV
        assert_eq!(blob.len(), SALT_LEN + 1 + 16 + 512 + 16);
        assert_eq!(blob[SALT_LEN], CONTAINER_VERSION);

        let opened = open(&blob, &pw, &fast_params()).unwrap();
        assert_eq!(opened, k);
    }

    #[test]
    fn test_salts_differ_per_blob() {
        let k = material(3);
        let pw = SecretString::from("pw");
        let rng: Arc<dyn RandomSource> = Arc::new(SeededRandom::new(4));
        let a = seal(&k, &pw, &fast_params(), rng.clone()).unwrap();
        let b = seal(&k, &pw, &fast_params(), rng).unwrap();
        assert_ne!(a[..SALT_LEN], b[..SALT_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_password_does_not_yield_key() {
        let k = material(5);
        let blob = seal(
            &k,
            &SecretString::from("right"),
            &fast_params(),
            Arc::new(SeededRandom::new(6)),
        )
        .unwrap();
        match open(&blob, &SecretString::from("wrong"), &fast_params()) {
            Ok(other) => assert_ne!(other, k),
            Err(e) => assert!(matches!(e, ShardError::Format(_)), "got {e:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_version_and_short_blob() {
        let k = material(7);
        let pw = SecretString::from("pw");
        let mut blob = seal(&k, &pw, &fast_params(), Arc::new(SeededRandom::new(8))).unwrap();
        blob[SALT_LEN] = 3;
        assert!(matches!(
            open(&blob, &pw, &fast_params()),
            Err(ShardError::Format(_))
        ));
        assert!(matches!(
            open(&blob[..40], &pw, &fast_params()),
            Err(ShardError::Format(_))
        ));
    }

    #[test]
    fn test_default_iterations() {
        assert_eq!(EnvelopeParams::default().iterations, 2048);
    }

    #[test]
    fn test_wrapping_key_debug_redacted() {
        let key = derive_wrapping_key(&SecretString::from("pw"), &[0u8; SALT_LEN], &fast_params())
            .unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
