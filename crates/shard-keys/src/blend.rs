//! XOR composition of key material over logical indices.

use shard_core::{ShardError, ShardResult};

use crate::material::KeyMaterial;

/// XOR `chain` into a copy of `base`. The output keeps `base`'s start offset.
/// Blending the same chain twice restores `base`.
pub fn blend(base: &KeyMaterial, chain: &[KeyMaterial]) -> ShardResult<KeyMaterial> {
    if let Some(bad) = chain.iter().find(|member| member.len() != base.len()) {
        return Err(ShardError::Range(format!(
            "cannot blend {} bytes of key material with {} bytes",
            base.len(),
            bad.len()
        )));
    }
    let mut out = base.clone();
    for member in chain {
        out.xor_logical(member);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shard_core::SeededRandom;

    fn random(len: usize, seed: u64) -> KeyMaterial {
        KeyMaterial::create_random(len, &SeededRandom::new(seed)).unwrap()
    }

    #[test]
    fn test_blend_twice_restores() {
        let base = random(64, 1);
        let chain = vec![random(64, 2), random(64, 3), random(64, 4)];
        let once = blend(&base, &chain).unwrap();
        assert_ne!(once.to_logical_bytes(), base.to_logical_bytes());
        assert_eq!(once.start(), base.start());
        let twice = blend(&once, &chain).unwrap();
        assert_eq!(twice, base);
    }

    #[test]
    fn test_blend_uses_logical_bytes() {
        let base = KeyMaterial::new(vec![0, 0, 0], 0).unwrap();
        let member = KeyMaterial::new(vec![1, 2, 3], 1).unwrap();
        let out = blend(&base, &[member]).unwrap();
        assert_eq!(out.to_logical_bytes(), vec![2, 3, 1]);
    }

    #[test]
    fn test_blend_length_mismatch() {
        let err = blend(&random(32, 1), &[random(33, 2)]).unwrap_err();
        assert!(matches!(err, ShardError::Range(_)));
    }

    proptest! {
        #[test]
        fn prop_blend_commutative(len in 1usize..128, a in any::<u64>(), b in any::<u64>(), c in any::<u64>()) {
            let base = random(len, a);
            let x = random(len, b);
            let y = random(len, c);
            let left = blend(&base, &[x.clone(), y.clone()]).unwrap();
            let right = blend(&base, &[y, x]).unwrap();
            prop_assert_eq!(left.to_logical_bytes(), right.to_logical_bytes());
        }

        #[test]
        fn prop_blend_associative(len in 1usize..64, a in any::<u64>(), b in any::<u64>(), c in any::<u64>()) {
            let base = random(len, a);
            let x = random(len, b);
            let y = random(len, c);
            let stepwise = blend(&blend(&base, &[x.clone()]).unwrap(), &[y.clone()]).unwrap();
            let together = blend(&base, &[x, y]).unwrap();
            prop_assert_eq!(stepwise.to_logical_bytes(), together.to_logical_bytes());
        }
    }
}
