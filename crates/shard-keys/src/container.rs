//! Binary container for KeyMaterial.
//!
//! ```text
//! [version: u8][start: u16 LE][raw bytes ...]
//!  ^ open       ^ payload (encrypted when inside an envelope)
//! ```
//!
//! The version byte always precedes the payload and is never encrypted.
//! Version 0 is the only version.

use shard_core::{ShardError, ShardResult};

use crate::material::KeyMaterial;

pub const CONTAINER_VERSION: u8 = 0;

const OFFSET_LEN: usize = 2;

pub fn encode_payload(material: &KeyMaterial) -> Vec<u8> {
    let mut out = Vec::with_capacity(OFFSET_LEN + material.len());
    out.extend_from_slice(&material.start().to_le_bytes());
    out.extend_from_slice(material.raw());
    out
}

pub fn decode_payload(version: u8, payload: &[u8]) -> ShardResult<KeyMaterial> {
    if version != CONTAINER_VERSION {
        return Err(ShardError::Format(format!(
            "unsupported key container version {version}"
        )));
    }
    if payload.len() <= OFFSET_LEN {
        return Err(ShardError::Format(format!(
            "key container payload too short: {} bytes",
            payload.len()
        )));
    }
    let start = u16::from_le_bytes([payload[0], payload[1]]);
    KeyMaterial::new(payload[OFFSET_LEN..].to_vec(), start)
}

/// Unencrypted container, version byte included.
pub fn to_container(material: &KeyMaterial) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + OFFSET_LEN + material.len());
    out.push(CONTAINER_VERSION);
    out.extend_from_slice(&encode_payload(material));
    out
}

pub fn from_container(bytes: &[u8]) -> ShardResult<KeyMaterial> {
    let (version, payload) = bytes
        .split_first()
        .ok_or_else(|| ShardError::Format("empty key container".into()))?;
    decode_payload(*version, payload)
}
