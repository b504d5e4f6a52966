//! AES-256-CBC as a pipeline stage.
//!
//! Per item, encrypt output is:
//! ```text
//! [ IV (16, plain) | CBC(padded input ‖ PKCS#7) ]
//! ```
//! The input-side padding comes from the consumer registration; PKCS#7 is
//! the cipher's own finalisation and always runs, so an empty payload still
//! yields one ciphertext block.
//!
//! Decrypt mode is double-staged: `{CBC decrypt, strip PKCS#7} → {unpad}`,
//! so callers always receive plaintext with the configured padding removed.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use shard_core::{OsRandom, RandomSource, ShardError, ShardResult};

use crate::dataset::{require_count, ConsumerToken, Dataset};
use crate::memory::MemoryDataset;
use crate::padding::{NoPadding, Padding};
use crate::transform::{ConnectedChain, ConnectedTransform, Transform};
use crate::unpad::UnpadTransform;

pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_KEY_SIZE: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

#[derive(Clone)]
struct CipherKey([u8; AES_KEY_SIZE]);

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Stage descriptor. Key and padding must be set before connecting.
#[derive(Clone)]
pub struct AesCbcTransform {
    key: Option<CipherKey>,
    mode: CipherMode,
    padding: Option<Arc<dyn Padding>>,
    rng: Arc<dyn RandomSource>,
}

impl AesCbcTransform {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            key: None,
            mode: CipherMode::Encrypt,
            padding: None,
            rng,
        }
    }

    pub fn set_key(&mut self, key: &[u8]) -> ShardResult<()> {
        let key: [u8; AES_KEY_SIZE] = key.try_into().map_err(|_| {
            ShardError::Configuration(format!(
                "AES-256 key must be {AES_KEY_SIZE} bytes, got {}",
                key.len()
            ))
        })?;
        self.key = Some(CipherKey(key));
        Ok(())
    }

    pub fn with_key(mut self, key: &[u8]) -> ShardResult<Self> {
        self.set_key(key)?;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: CipherMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_padding(mut self, padding: Arc<dyn Padding>) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }
}

impl Default for AesCbcTransform {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom))
    }
}

impl fmt::Debug for AesCbcTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbcTransform")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("mode", &self.mode)
            .field("padding", &self.padding)
            .finish()
    }
}

impl Transform for AesCbcTransform {
    fn connect(&self, source: Rc<dyn Dataset>) -> ShardResult<Box<dyn ConnectedTransform>> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| ShardError::Configuration("AES-CBC key is not set".into()))?;
        let padding = self
            .padding
            .clone()
            .ok_or_else(|| ShardError::Configuration("AES-CBC padding is not set".into()))?;

        match self.mode {
            CipherMode::Encrypt => {
                let stage = ConnectedCbc::connect(key, self.mode, padding, self.rng.clone(), source)?;
                Ok(Box::new(stage))
            }
            CipherMode::Decrypt => {
                if !padding.is_reversible() {
                    return Err(ShardError::Configuration(format!(
                        "cannot decrypt through write-only {}",
                        padding.name()
                    )));
                }
                let cipher = ConnectedCbc::connect(
                    key,
                    self.mode,
                    Arc::new(NoPadding),
                    self.rng.clone(),
                    source.clone(),
                )?;
                let unpad = UnpadTransform::new(padding, AES_BLOCK_SIZE).connect(cipher.result())?;
                Ok(Box::new(ConnectedChain::new(
                    source,
                    vec![Box::new(cipher), unpad],
                )))
            }
        }
    }
}

enum CbcState {
    Start,
    Encrypting(Aes256CbcEnc),
    Decrypting(Aes256CbcDec),
    Done,
}

struct CbcItem {
    state: CbcState,
    pending: Vec<u8>,
}

impl Default for CbcItem {
    fn default() -> Self {
        Self {
            state: CbcState::Start,
            pending: Vec::new(),
        }
    }
}

struct ConnectedCbc {
    key: CipherKey,
    mode: CipherMode,
    rng: Arc<dyn RandomSource>,
    token: ConsumerToken,
    source: Rc<dyn Dataset>,
    result: Rc<MemoryDataset>,
    items: Vec<CbcItem>,
}

fn encrypt_blocks(enc: &mut Aes256CbcEnc, data: &mut [u8]) {
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        enc.encrypt_block_mut(aes::Block::from_mut_slice(block));
    }
}

fn decrypt_blocks(dec: &mut Aes256CbcDec, data: &mut [u8]) {
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        dec.decrypt_block_mut(aes::Block::from_mut_slice(block));
    }
}

fn strip_pkcs7(block: &mut Vec<u8>) -> ShardResult<()> {
    let n = block.last().copied().unwrap_or(0) as usize;
    if n == 0 || n > AES_BLOCK_SIZE || n > block.len() {
        return Err(ShardError::Format("invalid PKCS#7 padding".into()));
    }
    if !block[block.len() - n..].iter().all(|&b| b as usize == n) {
        return Err(ShardError::Format("invalid PKCS#7 padding".into()));
    }
    block.truncate(block.len() - n);
    Ok(())
}

impl ConnectedCbc {
    fn connect(
        key: CipherKey,
        mode: CipherMode,
        padding: Arc<dyn Padding>,
        rng: Arc<dyn RandomSource>,
        source: Rc<dyn Dataset>,
    ) -> ShardResult<Self> {
        let token = ConsumerToken::new();
        source.register_consumer(token, AES_BLOCK_SIZE, padding)?;
        let result = MemoryDataset::following(source.as_ref());
        Ok(Self {
            key,
            mode,
            rng,
            token,
            source,
            result,
            items: Vec::new(),
        })
    }

    fn step_encrypt(&mut self, item: usize) -> ShardResult<()> {
        if matches!(self.items[item].state, CbcState::Start) {
            let mut iv = [0u8; AES_BLOCK_SIZE];
            self.rng.fill(&mut iv);
            let enc = Aes256CbcEnc::new_from_slices(&self.key.0, &iv)
                .map_err(|e| ShardError::Configuration(format!("AES-CBC init: {e}")))?;
            self.result.write(item, &iv)?;
            self.items[item].state = CbcState::Encrypting(enc);
            return Ok(());
        }

        let block = self.source.next_block(self.token, item)?;
        let state = &mut self.items[item];
        let CbcState::Encrypting(enc) = &mut state.state else {
            return Ok(());
        };
        match block {
            Some(block) => {
                state.pending.extend_from_slice(&block);
                let whole = state.pending.len() / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
                if whole > 0 {
                    let mut chunk: Vec<u8> = state.pending.drain(..whole).collect();
                    encrypt_blocks(enc, &mut chunk);
                    self.result.write(item, &chunk)?;
                }
            }
            None => {
                let mut last = std::mem::take(&mut state.pending);
                let pad = AES_BLOCK_SIZE - last.len();
                last.resize(AES_BLOCK_SIZE, pad as u8);
                encrypt_blocks(enc, &mut last);
                self.result.write(item, &last)?;
                self.result.finish(item)?;
                state.state = CbcState::Done;
            }
        }
        Ok(())
    }

    fn step_decrypt(&mut self, item: usize) -> ShardResult<()> {
        let block = self.source.next_block(self.token, item)?;
        let state = &mut self.items[item];

        if matches!(state.state, CbcState::Start) {
            let Some(block) = block else {
                return Err(ShardError::Format(format!(
                    "item {item}: ciphertext ends before the IV"
                )));
            };
            state.pending.extend_from_slice(&block);
            if state.pending.len() >= AES_BLOCK_SIZE {
                let iv: Vec<u8> = state.pending.drain(..AES_BLOCK_SIZE).collect();
                let dec = Aes256CbcDec::new_from_slices(&self.key.0, &iv)
                    .map_err(|e| ShardError::Configuration(format!("AES-CBC init: {e}")))?;
                state.state = CbcState::Decrypting(dec);
            }
            return Ok(());
        }

        let CbcState::Decrypting(dec) = &mut state.state else {
            return Ok(());
        };
        match block {
            Some(block) => {
                state.pending.extend_from_slice(&block);
                // hold back the last block: it carries PKCS#7
                let ready =
                    state.pending.len().saturating_sub(1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
                if ready > 0 {
                    let mut chunk: Vec<u8> = state.pending.drain(..ready).collect();
                    decrypt_blocks(dec, &mut chunk);
                    self.result.write(item, &chunk)?;
                }
            }
            None => {
                if state.pending.len() != AES_BLOCK_SIZE {
                    return Err(ShardError::Format(format!(
                        "item {item}: ciphertext is not a whole number of blocks"
                    )));
                }
                let mut last = std::mem::take(&mut state.pending);
                decrypt_blocks(dec, &mut last);
                strip_pkcs7(&mut last)?;
                self.result.write(item, &last)?;
                self.result.finish(item)?;
                state.state = CbcState::Done;
            }
        }
        Ok(())
    }
}

impl ConnectedTransform for ConnectedCbc {
    fn source(&self) -> Rc<dyn Dataset> {
        self.source.clone()
    }

    fn result(&self) -> Rc<dyn Dataset> {
        self.result.clone()
    }

    fn transform_next(&mut self) -> ShardResult<bool> {
        let count = require_count(self.source.as_ref())?;
        if self.items.len() < count {
            self.items.resize_with(count, CbcItem::default);
        }
        let mut active = false;
        for item in 0..count {
            if matches!(self.items[item].state, CbcState::Done) {
                continue;
            }
            match self.mode {
                CipherMode::Encrypt => self.step_encrypt(item)?,
                CipherMode::Decrypt => self.step_decrypt(item)?,
            }
            active |= !matches!(self.items[item].state, CbcState::Done);
        }
        Ok(active)
    }
}
