//! Name → implementation lookup for catalog layers.

use std::sync::Arc;

use shard_core::{RandomSource, ShardError, ShardResult};
use shard_pipeline::{
    AesCbcTransform, CipherMode, NoPadding, Padding, RandomPadding, ZeroPadding, AES_KEY_SIZE,
};

pub const AES_CBC: &str = "AesCbc";
pub const RANDOM_PADDING: &str = "RandomPadding";
pub const NO_PADDING: &str = "NoPadding";
pub const ZERO_PADDING: &str = "ZeroPadding";

/// Resolve a padding name. `rng` feeds random padding bytes.
pub fn padding(name: &str, rng: &Arc<dyn RandomSource>) -> ShardResult<Arc<dyn Padding>> {
    match name {
        RANDOM_PADDING => Ok(Arc::new(RandomPadding::new(rng.clone()))),
        NO_PADDING => Ok(Arc::new(NoPadding)),
        ZERO_PADDING => Ok(Arc::new(ZeroPadding)),
        other => Err(ShardError::Configuration(format!(
            "unknown padding '{other}'"
        ))),
    }
}

/// Key size the named cipher needs.
pub fn cipher_key_size(name: &str) -> ShardResult<usize> {
    match name {
        AES_CBC => Ok(AES_KEY_SIZE),
        other => Err(ShardError::Configuration(format!("unknown cipher '{other}'"))),
    }
}

/// Cipher stage for one layer direction.
pub fn cipher(
    name: &str,
    key: &[u8],
    mode: CipherMode,
    padding: Arc<dyn Padding>,
    rng: &Arc<dyn RandomSource>,
) -> ShardResult<AesCbcTransform> {
    match name {
        AES_CBC => Ok(AesCbcTransform::new(rng.clone())
            .with_key(key)?
            .with_mode(mode)
            .with_padding(padding)),
        other => Err(ShardError::Configuration(format!("unknown cipher '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_core::OsRandom;

    #[test]
    fn test_known_names() {
        let rng: Arc<dyn RandomSource> = Arc::new(OsRandom);
        assert_eq!(padding(RANDOM_PADDING, &rng).unwrap().name(), "RandomPadding");
        assert!(!padding(ZERO_PADDING, &rng).unwrap().is_reversible());
        assert_eq!(cipher_key_size(AES_CBC).unwrap(), 32);
        let stage = cipher(AES_CBC, &[0u8; 32], CipherMode::Decrypt, Arc::new(NoPadding), &rng)
            .unwrap();
        assert_eq!(stage.mode(), CipherMode::Decrypt);
    }

    #[test]
    fn test_unknown_names() {
        let rng: Arc<dyn RandomSource> = Arc::new(OsRandom);
        assert!(matches!(padding("Pkcs9", &rng), Err(ShardError::Configuration(_))));
        assert!(cipher_key_size("Rot13").is_err());
        assert!(cipher("Rot13", &[0; 32], CipherMode::Encrypt, Arc::new(NoPadding), &rng).is_err());
    }
}
