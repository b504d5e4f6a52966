//! The encryption engine: owns catalogs, key distribution and pipelines.
//!
//! Remote layout under the configured root:
//!
//! ```text
//! <root>/Configuration/CloudId          every backend, its UUID
//! <root>/Configuration/Keys/<key id>    envelope blobs
//! <root>/Configuration/EncryptionSets   tagged catalog, backend 0
//! <root>/Configuration/KeyChains        tagged catalog, backend 0
//! <root>/Test/<set id>                  integrity probe, backend 0
//! ```
//!
//! Chain share `i` lives on backend `i`. Layer key `i` is stored blended with
//! its chain on backend `n - (i mod n) - 1`, so recovering any layer key
//! takes the password and every backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use secrecy::SecretString;
use shard_core::config::EngineConfig;
use shard_core::types::{BackendId, ChainId, KeyId, SetId, ID_LEN};
use shard_core::{RandomSource, ShardError, ShardResult};
use shard_keys::{blend, EnvelopeParams, KeyMaterial};
use shard_pipeline::transform::DEFAULT_OUTPUT_BLOCK;
use shard_pipeline::{
    stream_item_to, transform_items, CipherMode, ConnectedTransform, NoPadding, ReaderDataset,
    Transform, TransformChain, UnpadTransform, AES_BLOCK_SIZE,
};
use shard_storage::{CachedFileStream, ChunkCache, CloudStorage, StorageFileHandle};

use crate::catalog::{
    decode_catalog, encode_catalog, tag_key, EncryptionLayer, EncryptionSet, KeyChain,
};
use crate::{probe, registry};

const CONFIGURATION_DIR: &str = "Configuration";
const KEYS_DIR: &str = "Keys";
const TEST_DIR: &str = "Test";
const CLOUD_ID_FILE: &str = "CloudId";
const SETS_CATALOG: &str = "EncryptionSets";
const CHAINS_CATALOG: &str = "KeyChains";

/// One storage backend with its persisted identity.
#[derive(Clone)]
pub struct Backend {
    pub id: BackendId,
    pub storage: Arc<dyn CloudStorage>,
}

struct Pipelines {
    encrypt: Arc<TransformChain>,
    decrypt: Arc<TransformChain>,
}

pub struct Engine {
    config: EngineConfig,
    envelope: EnvelopeParams,
    backends: Vec<Backend>,
    cache: Arc<dyn ChunkCache>,
    rng: Arc<dyn RandomSource>,
    password: Option<Arc<SecretString>>,
    sets: BTreeMap<SetId, EncryptionSet>,
    chains: BTreeMap<ChainId, KeyChain>,
    /// Backend index holding each stored key
    key_locations: HashMap<KeyId, usize>,
    /// Unlocked or freshly generated material; layer keys are held unblended
    keys: HashMap<KeyId, KeyMaterial>,
    pipelines: HashMap<SetId, Pipelines>,
    pending_chains: Vec<ChainId>,
    pending_sets: Vec<SetId>,
}

impl Engine {
    /// Bootstrap every backend's directories and identity, index stored keys
    /// and load the catalogs from backend 0.
    pub fn open(
        config: EngineConfig,
        storages: Vec<Arc<dyn CloudStorage>>,
        cache: Arc<dyn ChunkCache>,
        rng: Arc<dyn RandomSource>,
    ) -> ShardResult<Self> {
        if storages.is_empty() {
            return Err(ShardError::Configuration(
                "at least one storage backend is required".into(),
            ));
        }

        let mut engine = Self {
            envelope: EnvelopeParams {
                iterations: config.kdf_iterations,
            },
            config,
            backends: Vec::with_capacity(storages.len()),
            cache,
            rng,
            password: None,
            sets: BTreeMap::new(),
            chains: BTreeMap::new(),
            key_locations: HashMap::new(),
            keys: HashMap::new(),
            pipelines: HashMap::new(),
            pending_chains: Vec::new(),
            pending_sets: Vec::new(),
        };

        for storage in storages {
            let id = engine.bootstrap_backend(storage.as_ref())?;
            if engine.backends.iter().any(|b| b.id == id) {
                return Err(ShardError::Configuration(format!(
                    "backend {} has the same identity {id} as another backend",
                    storage.name()
                )));
            }
            engine.backends.push(Backend { id, storage });
        }
        engine.index_keys()?;

        let test_dir = engine.test_dir();
        let primary = engine.primary();
        if !primary.directory_exists(&test_dir)? {
            primary.create_directory(&test_dir)?;
        }

        engine.load_catalogs()?;
        tracing::info!(
            backends = engine.backends.len(),
            keys = engine.key_locations.len(),
            sets = engine.sets.len(),
            chains = engine.chains.len(),
            "engine opened"
        );
        Ok(engine)
    }

    fn config_dir(&self) -> String {
        format!("{}/{CONFIGURATION_DIR}", self.config.root)
    }

    fn keys_dir(&self) -> String {
        format!("{}/{CONFIGURATION_DIR}/{KEYS_DIR}", self.config.root)
    }

    fn test_dir(&self) -> String {
        format!("{}/{TEST_DIR}", self.config.root)
    }

    fn key_path(&self, key: KeyId) -> String {
        format!("{}/{key}", self.keys_dir())
    }

    fn probe_path(&self, set: SetId) -> String {
        format!("{}/{set}", self.test_dir())
    }

    fn catalog_path(&self, name: &str) -> String {
        format!("{}/{name}", self.config_dir())
    }

    fn primary(&self) -> &dyn CloudStorage {
        self.backends[0].storage.as_ref()
    }

    /// Create the directory tree and read, or mint, the backend's CloudId.
    fn bootstrap_backend(&self, storage: &dyn CloudStorage) -> ShardResult<BackendId> {
        for dir in [self.config.root.clone(), self.config_dir(), self.keys_dir()] {
            if !storage.directory_exists(&dir)? {
                storage.create_directory(&dir)?;
            }
        }

        let id_path = format!("{}/{CLOUD_ID_FILE}", self.config_dir());
        if storage.file_exists(&id_path)? {
            let raw = storage.read_all(&id_path)?;
            match std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| text.parse::<BackendId>().ok())
            {
                Some(id) => return Ok(id),
                None => tracing::warn!(
                    backend = storage.name(),
                    "unreadable CloudId, issuing a new identity"
                ),
            }
        }
        let id = BackendId::generate(self.rng.as_ref());
        storage.write_all(&id_path, id.to_string().as_bytes())?;
        tracing::info!(backend = storage.name(), %id, "assigned backend identity");
        Ok(id)
    }

    fn index_keys(&mut self) -> ShardResult<()> {
        let dir = self.keys_dir();
        for (index, backend) in self.backends.iter().enumerate() {
            for entry in backend.storage.list(&dir)? {
                if entry.is_dir {
                    continue;
                }
                let Ok(key) = entry.name.parse::<KeyId>() else {
                    continue;
                };
                if let Some(first) = self.key_locations.get(&key) {
                    tracing::warn!(%key, first, duplicate = index, "key stored on two backends");
                    continue;
                }
                self.key_locations.insert(key, index);
            }
        }
        Ok(())
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend_ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|b| b.id).collect()
    }

    pub fn sets(&self) -> impl Iterator<Item = &EncryptionSet> {
        self.sets.values()
    }

    pub fn set(&self, id: SetId) -> Option<&EncryptionSet> {
        self.sets.get(&id)
    }

    pub fn chains(&self) -> impl Iterator<Item = &KeyChain> {
        self.chains.values()
    }

    pub fn chain(&self, id: ChainId) -> Option<&KeyChain> {
        self.chains.get(&id)
    }

    /// Every key the set needs is in memory.
    pub fn is_unlocked(&self, id: SetId) -> bool {
        let Some(set) = self.sets.get(&id) else {
            return false;
        };
        let chain_ready = self
            .chains
            .get(&set.key_chain)
            .is_some_and(|c| c.keys.iter().all(|k| self.keys.contains_key(k)));
        chain_ready && set.layers.iter().all(|l| self.keys.contains_key(&l.key_id))
    }

    /// Newly created chains or sets that are not yet protected remotely.
    pub fn has_pending(&self) -> bool {
        !self.pending_chains.is_empty() || !self.pending_sets.is_empty()
    }

    pub fn set_master_password(&mut self, password: SecretString) {
        self.password = Some(Arc::new(password));
    }

    fn fresh_key_id(&self) -> KeyId {
        loop {
            let id = KeyId::generate(self.rng.as_ref());
            if !self.keys.contains_key(&id) && !self.key_locations.contains_key(&id) {
                return id;
            }
        }
    }

    fn new_material(&self) -> ShardResult<KeyMaterial> {
        KeyMaterial::create_random(self.config.key_material_len, self.rng.as_ref())
    }

    /// Generate one share per backend. Held in memory until protected.
    pub fn create_key_chain(&mut self) -> ShardResult<ChainId> {
        let mut keys = Vec::with_capacity(self.backends.len());
        for _ in 0..self.backends.len() {
            let id = self.fresh_key_id();
            self.keys.insert(id, self.new_material()?);
            keys.push(id);
        }
        let id = loop {
            let id = ChainId::generate(self.rng.as_ref());
            if !self.chains.contains_key(&id) {
                break id;
            }
        };
        self.chains.insert(id, KeyChain { id, keys });
        self.pending_chains.push(id);
        tracing::info!(chain = %id, shares = self.backends.len(), "created key chain");
        Ok(id)
    }

    /// Generate `count` layer keys for use in a new set.
    pub fn create_encryption_keys(&mut self, count: usize) -> ShardResult<Vec<KeyId>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.fresh_key_id();
            self.keys.insert(id, self.new_material()?);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Register a new immutable set. Its keys are protected by the next
    /// [`Engine::protect_new_keys`].
    pub fn create_encryption_set(
        &mut self,
        layers: Vec<EncryptionLayer>,
        key_chain: ChainId,
    ) -> ShardResult<SetId> {
        if layers.is_empty() {
            return Err(ShardError::Configuration(
                "an encryption set needs at least one layer".into(),
            ));
        }
        let chain = self.chains.get(&key_chain).ok_or_else(|| {
            ShardError::Configuration(format!("unknown key chain {key_chain}"))
        })?;
        if chain.keys.iter().any(|k| !self.keys.contains_key(k)) {
            return Err(ShardError::Configuration(format!(
                "key chain {key_chain} is locked"
            )));
        }

        // A layer key belongs to one set and is never a chain share
        let taken: HashSet<KeyId> = self
            .chains
            .values()
            .flat_map(|c| c.keys.iter().copied())
            .chain(
                self.sets
                    .values()
                    .flat_map(|s| s.layers.iter().map(|l| l.key_id)),
            )
            .collect();
        let mut seen = HashSet::with_capacity(layers.len());
        for layer in &layers {
            if taken.contains(&layer.key_id) || !seen.insert(layer.key_id) {
                return Err(ShardError::Configuration(format!(
                    "layer key {} is already in use",
                    layer.key_id
                )));
            }
        }

        for layer in &layers {
            let expected = registry::cipher_key_size(&layer.cipher)?;
            if layer.key_size != expected {
                return Err(ShardError::Range(format!(
                    "{} needs a {expected}-byte key, layer asks for {}",
                    layer.cipher, layer.key_size
                )));
            }
            if layer.key_size > self.config.key_material_len {
                return Err(ShardError::Range(format!(
                    "key size {} exceeds key material length {}",
                    layer.key_size, self.config.key_material_len
                )));
            }
            let padding = registry::padding(&layer.padding, &self.rng)?;
            if !padding.is_reversible() {
                return Err(ShardError::Configuration(format!(
                    "{} cannot be decrypted back and is not allowed in a set",
                    layer.padding
                )));
            }
            if !self.keys.contains_key(&layer.key_id) {
                return Err(ShardError::Configuration(format!(
                    "layer key {} was not generated by this engine",
                    layer.key_id
                )));
            }
            if self.key_locations.contains_key(&layer.key_id) {
                return Err(ShardError::Configuration(format!(
                    "layer key {} is already stored for another set",
                    layer.key_id
                )));
            }
        }

        let id = loop {
            let id = SetId::generate(self.rng.as_ref());
            if !self.sets.contains_key(&id) {
                break id;
            }
        };
        self.sets.insert(
            id,
            EncryptionSet {
                id,
                key_chain,
                layers,
            },
        );
        self.pending_sets.push(id);
        tracing::info!(set = %id, chain = %key_chain, "created encryption set");
        Ok(id)
    }

    fn chain_materials(&self, chain: &KeyChain) -> ShardResult<Vec<KeyMaterial>> {
        chain
            .keys
            .iter()
            .map(|k| {
                self.keys.get(k).cloned().ok_or_else(|| {
                    ShardError::Configuration(format!("chain key {k} is locked"))
                })
            })
            .collect()
    }

    fn store_key(
        &mut self,
        key: KeyId,
        material: &KeyMaterial,
        backend: usize,
        password: &SecretString,
    ) -> ShardResult<()> {
        let blob = shard_keys::seal(material, password, &self.envelope, self.rng.clone())?;
        let path = self.key_path(key);
        self.backends[backend].storage.write_all(&path, &blob)?;
        self.key_locations.insert(key, backend);
        tracing::debug!(%key, backend, "stored key envelope");
        Ok(())
    }

    /// Upload envelopes for every new chain and set, then write each new
    /// set's integrity probe.
    pub fn protect_new_keys(&mut self) -> ShardResult<()> {
        if !self.has_pending() {
            return Ok(());
        }
        let password = self.password.clone().ok_or_else(|| {
            ShardError::Configuration("master password must be set before protecting keys".into())
        })?;

        for chain_id in self.pending_chains.clone() {
            let chain = self.chains.get(&chain_id).cloned().ok_or_else(|| {
                ShardError::Configuration(format!("unknown key chain {chain_id}"))
            })?;
            let materials = self.chain_materials(&chain)?;
            for (index, (key, material)) in chain.keys.iter().zip(&materials).enumerate() {
                self.store_key(*key, material, index, &password)?;
            }
            self.pending_chains.retain(|c| *c != chain_id);
        }

        let n = self.backends.len();
        for set_id in self.pending_sets.clone() {
            let set = self.sets.get(&set_id).cloned().ok_or_else(|| {
                ShardError::Configuration(format!("unknown encryption set {set_id}"))
            })?;
            let chain = self.chains.get(&set.key_chain).cloned().ok_or_else(|| {
                ShardError::Configuration(format!("unknown key chain {}", set.key_chain))
            })?;
            let materials = self.chain_materials(&chain)?;

            for (i, layer) in set.layers.iter().enumerate() {
                let real = self.keys.get(&layer.key_id).ok_or_else(|| {
                    ShardError::Configuration(format!("layer key {} is locked", layer.key_id))
                })?;
                let stored = blend(real, &materials)?;
                self.store_key(layer.key_id, &stored, n - i % n - 1, &password)?;
            }

            let plain = probe::build(self.config.probe_len, self.rng.as_ref());
            let encrypt = self.build_pipeline(set_id, true)?;
            let sealed = first_item(transform_items(encrypt.as_ref(), &[&plain])?)?;
            let path = self.probe_path(set_id);
            self.primary().write_all(&path, &sealed)?;

            self.pending_sets.retain(|s| *s != set_id);
            tracing::info!(set = %set_id, layers = set.layers.len(), "protected encryption set");
        }
        Ok(())
    }

    fn read_key(&self, key: KeyId, password: &SecretString) -> ShardResult<KeyMaterial> {
        let backend = *self
            .key_locations
            .get(&key)
            .ok_or_else(|| ShardError::NotFound(format!("key {key} is not stored on any backend")))?;
        let blob = self.backends[backend].storage.read_all(&self.key_path(key))?;
        shard_keys::open(&blob, password, &self.envelope)
    }

    /// Load and verify every key `set` needs. On any failure nothing loaded by
    /// this call is kept; storage errors come back as-is, everything else as
    /// [`ShardError::Authentication`].
    pub fn unlock_keys(&mut self, set_id: SetId, password: &SecretString) -> ShardResult<()> {
        let set = self
            .sets
            .get(&set_id)
            .cloned()
            .ok_or_else(|| ShardError::Configuration(format!("unknown encryption set {set_id}")))?;
        let chain = self.chains.get(&set.key_chain).cloned().ok_or_else(|| {
            ShardError::Configuration(format!("unknown key chain {}", set.key_chain))
        })?;

        let mut loaded = Vec::new();
        match self.try_unlock(&set, &chain, password, &mut loaded) {
            Ok(()) => Ok(()),
            Err(err) => {
                for key in &loaded {
                    self.keys.remove(key);
                }
                self.pipelines.remove(&set_id);
                if err.is_backend() {
                    return Err(err);
                }
                tracing::warn!(set = %set_id, "unlock rejected");
                tracing::debug!(set = %set_id, "unlock failure detail: {err}");
                Err(ShardError::Authentication(format!(
                    "could not unlock encryption set {set_id}"
                )))
            }
        }
    }

    fn try_unlock(
        &mut self,
        set: &EncryptionSet,
        chain: &KeyChain,
        password: &SecretString,
        loaded: &mut Vec<KeyId>,
    ) -> ShardResult<()> {
        for key in &chain.keys {
            if !self.keys.contains_key(key) {
                let material = self.read_key(*key, password)?;
                self.keys.insert(*key, material);
                loaded.push(*key);
            }
        }
        let materials = self.chain_materials(chain)?;

        for layer in &set.layers {
            if !self.keys.contains_key(&layer.key_id) {
                let stored = self.read_key(layer.key_id, password)?;
                let real = blend(&stored, &materials)?;
                self.keys.insert(layer.key_id, real);
                loaded.push(layer.key_id);
            }
        }

        if loaded.is_empty() {
            return Ok(());
        }

        let sealed = self.primary().read_all(&self.probe_path(set.id))?;
        let decrypt = self.build_pipeline(set.id, false)?;
        let plain = first_item(transform_items(decrypt.as_ref(), &[&sealed])?)?;
        probe::verify(&plain)?;
        tracing::info!(set = %set.id, keys = loaded.len(), "unlocked encryption set");
        Ok(())
    }

    /// Transform chain for `set` in one direction, built once per set.
    ///
    /// Encrypt applies layer 0 first. Decrypt mirrors it: every layer but
    /// layer 0 decrypts without padding and is followed by an explicit unpad
    /// stage; layer 0 uses the cipher's built-in unpad.
    pub fn build_pipeline(
        &mut self,
        set_id: SetId,
        encrypt: bool,
    ) -> ShardResult<Arc<TransformChain>> {
        if let Some(cached) = self.pipelines.get(&set_id) {
            return Ok(if encrypt {
                cached.encrypt.clone()
            } else {
                cached.decrypt.clone()
            });
        }
        let set = self
            .sets
            .get(&set_id)
            .ok_or_else(|| ShardError::Configuration(format!("unknown encryption set {set_id}")))?;

        let mut layers = Vec::with_capacity(set.layers.len());
        for layer in &set.layers {
            let material = self.keys.get(&layer.key_id).ok_or_else(|| {
                ShardError::Configuration(format!(
                    "keys for encryption set {set_id} are locked"
                ))
            })?;
            let key = material.extract(0, layer.key_size)?;
            let padding = registry::padding(&layer.padding, &self.rng)?;
            layers.push((layer, key, padding));
        }

        let mut encrypt_chain = TransformChain::new();
        for (layer, key, padding) in &layers {
            let stage = registry::cipher(
                &layer.cipher,
                key,
                CipherMode::Encrypt,
                padding.clone(),
                &self.rng,
            )?;
            encrypt_chain.push(Arc::new(stage));
        }

        let mut decrypt_chain = TransformChain::new();
        for (index, (layer, key, padding)) in layers.iter().enumerate().rev() {
            if index == 0 {
                let stage = registry::cipher(
                    &layer.cipher,
                    key,
                    CipherMode::Decrypt,
                    padding.clone(),
                    &self.rng,
                )?;
                decrypt_chain.push(Arc::new(stage));
            } else {
                let stage = registry::cipher(
                    &layer.cipher,
                    key,
                    CipherMode::Decrypt,
                    Arc::new(NoPadding),
                    &self.rng,
                )?;
                decrypt_chain.push(Arc::new(stage));
                decrypt_chain.push(Arc::new(UnpadTransform::new(padding.clone(), AES_BLOCK_SIZE)));
            }
        }

        let pipelines = Pipelines {
            encrypt: Arc::new(encrypt_chain),
            decrypt: Arc::new(decrypt_chain),
        };
        let chosen = if encrypt {
            pipelines.encrypt.clone()
        } else {
            pipelines.decrypt.clone()
        };
        self.pipelines.insert(set_id, pipelines);
        tracing::debug!(set = %set_id, layers = layers.len(), "built pipelines");
        Ok(chosen)
    }

    /// Write both catalogs to backend 0, protecting pending keys first so
    /// no catalog entry refers to keys that are not stored.
    pub fn save_catalogs(&mut self) -> ShardResult<()> {
        self.protect_new_keys()?;
        let key = tag_key(&self.backend_ids());
        let sets: Vec<EncryptionSet> = self.sets.values().cloned().collect();
        let chains: Vec<KeyChain> = self.chains.values().cloned().collect();

        let sets_bytes = encode_catalog(&sets, &key)?;
        let chains_bytes = encode_catalog(&chains, &key)?;
        let primary = self.primary();
        primary.write_all(&self.catalog_path(SETS_CATALOG), &sets_bytes)?;
        primary.write_all(&self.catalog_path(CHAINS_CATALOG), &chains_bytes)?;
        tracing::info!(sets = sets.len(), chains = chains.len(), "saved catalogs");
        Ok(())
    }

    /// Read and verify both catalogs from backend 0. Records are adopted only
    /// after both tags verify; entries already in memory win.
    pub fn load_catalogs(&mut self) -> ShardResult<()> {
        let key = tag_key(&self.backend_ids());
        let sets: Vec<EncryptionSet> = self.read_catalog(SETS_CATALOG, &key)?;
        let chains: Vec<KeyChain> = self.read_catalog(CHAINS_CATALOG, &key)?;

        for set in sets {
            self.sets.entry(set.id).or_insert(set);
        }
        for chain in chains {
            self.chains.entry(chain.id).or_insert(chain);
        }
        Ok(())
    }

    fn read_catalog<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        key: &[u8],
    ) -> ShardResult<Vec<T>> {
        let path = self.catalog_path(name);
        if !self.primary().file_exists(&path)? {
            return Ok(Vec::new());
        }
        let bytes = self.primary().read_all(&path)?;
        decode_catalog(&bytes, key)
    }

    fn backend(&self, index: usize) -> ShardResult<&Backend> {
        self.backends.get(index).ok_or_else(|| {
            ShardError::Range(format!(
                "backend index {index} out of range ({} configured)",
                self.backends.len()
            ))
        })
    }

    /// Encrypt a local file into `remote` on backend `backend`, replacing any
    /// existing file. Returns the number of bytes uploaded.
    pub fn encrypt_file_to_remote(
        &mut self,
        set_id: SetId,
        local: &Path,
        backend: usize,
        remote: &str,
    ) -> ShardResult<u64> {
        let target = self.backend(backend)?.clone();
        let pipeline = self.build_pipeline(set_id, true)?;

        let source = Rc::new(ReaderDataset::new());
        source.add_file(local)?;
        source.fix()?;
        let mut connected = pipeline.connect(source)?;

        let handle = StorageFileHandle::create(target.storage.clone(), target.id, remote)?;
        let mut stream = CachedFileStream::create(Box::new(handle), self.cache.clone())?;
        stream.write_all(set_id.as_bytes())?;
        stream_item_to(connected.as_mut(), 0, DEFAULT_OUTPUT_BLOCK, &mut stream)?;
        stream.flush()?;

        let length = stream.len();
        tracing::info!(
            set = %set_id,
            local = %local.display(),
            backend = target.storage.name(),
            remote,
            length,
            "encrypted file to remote"
        );
        Ok(length)
    }

    /// Set id stored in the header of an encrypted remote file.
    pub fn remote_file_set(&self, backend: usize, remote: &str) -> ShardResult<SetId> {
        let storage = &self.backend(backend)?.storage;
        let header = storage.read_range(remote, 0, ID_LEN)?;
        if header.len() < ID_LEN {
            return Err(ShardError::Format(format!(
                "{remote} is too short for an encrypted file header"
            )));
        }
        SetId::from_slice(&header)
    }

    /// Connected decrypt pipeline over an encrypted remote file, read through
    /// the chunk cache. The caller drives it; the plaintext is item 0.
    pub fn open_remote_decrypt(
        &mut self,
        backend: usize,
        remote: &str,
    ) -> ShardResult<Box<dyn ConnectedTransform>> {
        let set_id = self.remote_file_set(backend, remote)?;
        if !self.sets.contains_key(&set_id) {
            return Err(ShardError::Configuration(format!(
                "{remote} was encrypted with unknown set {set_id}"
            )));
        }
        let pipeline = self.build_pipeline(set_id, false)?;
        let source = self.backend(backend)?.clone();

        let handle = StorageFileHandle::open(source.storage, source.id, remote, false)?;
        let stream = CachedFileStream::open(Box::new(handle), self.cache.clone());
        let dataset = Rc::new(ReaderDataset::new());
        dataset.add_reader(remote, Box::new(stream), ID_LEN as u64)?;
        dataset.fix()?;
        pipeline.connect(dataset)
    }

    /// Decrypt an encrypted remote file into `out`. Returns plaintext bytes.
    pub fn decrypt_remote_file(
        &mut self,
        backend: usize,
        remote: &str,
        out: &mut dyn Write,
    ) -> ShardResult<u64> {
        let mut connected = self.open_remote_decrypt(backend, remote)?;
        let written = stream_item_to(connected.as_mut(), 0, DEFAULT_OUTPUT_BLOCK, out)?;
        tracing::info!(backend, remote, written, "decrypted remote file");
        Ok(written)
    }
}

fn first_item(mut outputs: Vec<Vec<u8>>) -> ShardResult<Vec<u8>> {
    if outputs.is_empty() {
        return Err(ShardError::Format("pipeline produced no output item".into()));
    }
    Ok(outputs.swap_remove(0))
}
