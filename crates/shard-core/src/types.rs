//! Typed identifiers shared across crates.
//!
//! All identifiers are UUIDs. Keys, sets and chains are persisted in catalogs
//! and remote paths by their hyphenated string form; a set id is also written
//! as 16 raw bytes at the head of every encrypted file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ShardError, ShardResult};
use crate::random::RandomSource;

/// Width of a raw identifier on the wire.
pub const ID_LEN: usize = 16;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh random (v4) identifier drawn from `rng`.
            pub fn generate(rng: &dyn RandomSource) -> Self {
                let mut bytes = [0u8; ID_LEN];
                rng.fill(&mut bytes);
                Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
            }

            pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn from_slice(bytes: &[u8]) -> ShardResult<Self> {
                Uuid::from_slice(bytes).map(Self).map_err(|e| {
                    ShardError::Format(format!(concat!("invalid ", stringify!($name), ": {}"), e))
                })
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                self.0.as_bytes()
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ShardError;

            fn from_str(s: &str) -> ShardResult<Self> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
                    ShardError::Format(format!(concat!("invalid ", stringify!($name), " '{}': {}"), s, e))
                })
            }
        }
    };
}

uuid_id!(
    /// Identifies one stored KeyMaterial (a chain share or a layer key)
    KeyId
);
uuid_id!(
    /// Identifies an encryption set; written at the head of every encrypted file
    SetId
);
uuid_id!(
    /// Identifies a key chain
    ChainId
);
uuid_id!(
    /// One open remote-file transaction; owns its dirty cache chunks
    HandleId
);
uuid_id!(
    /// Stable identity of a storage backend, read from its `CloudId` file
    BackendId
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    #[test]
    fn test_generate_is_deterministic_with_seed() {
        let a = KeyId::generate(&SeededRandom::new(7));
        let b = KeyId::generate(&SeededRandom::new(7));
        assert_eq!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_string_and_bytes_roundtrip() {
        let rng = SeededRandom::new(1);
        let id = SetId::generate(&rng);
        let parsed: SetId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(SetId::from_slice(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_invalid_inputs_are_format_errors() {
        assert!(matches!("nope".parse::<ChainId>(), Err(ShardError::Format(_))));
        assert!(matches!(SetId::from_slice(&[1, 2, 3]), Err(ShardError::Format(_))));
    }
}
