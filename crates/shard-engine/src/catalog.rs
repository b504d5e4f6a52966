//! Encryption-set and key-chain records plus their tagged persistence.
//!
//! A catalog file is one line with the base64 HMAC-SHA512 tag, then the JSON
//! record list:
//!
//! ```text
//! <base64(HMAC-SHA512(key = sorted backend ids joined by ';', body))>\n
//! <JSON body>
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use shard_core::types::{BackendId, ChainId, KeyId, SetId};
use shard_core::{ShardError, ShardResult};

type HmacSha512 = Hmac<Sha512>;

/// One cipher layer of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionLayer {
    /// Registered cipher name, e.g. `AesCbc`
    pub cipher: String,
    /// Registered padding name applied to this layer's input
    pub padding: String,
    /// Bytes extracted from the layer's key material
    pub key_size: usize,
    pub key_id: KeyId,
}

impl EncryptionLayer {
    pub fn new(
        cipher: impl Into<String>,
        padding: impl Into<String>,
        key_size: usize,
        key_id: KeyId,
    ) -> Self {
        Self {
            cipher: cipher.into(),
            padding: padding.into(),
            key_size,
            key_id,
        }
    }
}

/// Immutable once created. Layer 0 is applied first on encrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSet {
    pub id: SetId,
    pub key_chain: ChainId,
    pub layers: Vec<EncryptionLayer>,
}

/// One key share per backend, in backend order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChain {
    pub id: ChainId,
    pub keys: Vec<KeyId>,
}

/// HMAC key for catalog tags: sorted backend ids joined with `;`.
pub fn tag_key(backends: &[BackendId]) -> Vec<u8> {
    let mut ids: Vec<BackendId> = backends.to_vec();
    ids.sort();
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(";")
        .into_bytes()
}

fn mac(key: &[u8]) -> ShardResult<HmacSha512> {
    HmacSha512::new_from_slice(key)
        .map_err(|e| ShardError::Configuration(format!("catalog tag key: {e}")))
}

/// Serialize `records` behind a tag line.
pub fn encode_catalog<T: Serialize>(records: &[T], key: &[u8]) -> ShardResult<Vec<u8>> {
    let body = serde_json::to_vec(records)
        .map_err(|e| ShardError::Format(format!("serializing catalog: {e}")))?;
    let mut mac = mac(key)?;
    mac.update(&body);
    let tag = BASE64.encode(mac.finalize().into_bytes());

    let mut out = Vec::with_capacity(tag.len() + 1 + body.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&body);
    Ok(out)
}

/// Verify the tag line, then parse the body. Nothing is parsed on mismatch.
pub fn decode_catalog<T: DeserializeOwned>(bytes: &[u8], key: &[u8]) -> ShardResult<Vec<T>> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| ShardError::Format("catalog has no tag line".into()))?;
    let (tag_line, body) = (&bytes[..split], &bytes[split + 1..]);
    let tag_line = tag_line.strip_suffix(b"\r").unwrap_or(tag_line);
    let tag = BASE64
        .decode(tag_line)
        .map_err(|e| ShardError::Format(format!("catalog tag is not base64: {e}")))?;

    let mut mac = mac(key)?;
    mac.update(body);
    mac.verify_slice(&tag)
        .map_err(|_| ShardError::Format("catalog tag mismatch".into()))?;

    serde_json::from_slice(body).map_err(|e| ShardError::Format(format!("parsing catalog: {e}")))
}
