//! End-to-end tests: create keys, protect them, reopen the engine, unlock and
//! run files through the two-layer pipeline across several backends.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use shard_core::config::EngineConfig;
use shard_core::types::SetId;
use shard_core::{SeededRandom, ShardError};
use shard_engine::registry::{AES_CBC, NO_PADDING, RANDOM_PADDING};
use shard_engine::{EncryptionLayer, Engine};
use shard_storage::{CloudStorage, LocalFsBackend, MemoryChunkCache, MemoryStorage};
use tempfile::TempDir;

const PASSWORD: &str = "correct horse battery staple";

fn config() -> EngineConfig {
    EngineConfig {
        kdf_iterations: 32,
        probe_len: 128,
        ..EngineConfig::default()
    }
}

fn cache() -> Arc<MemoryChunkCache> {
    // small chunks so every file spans several of them
    Arc::new(MemoryChunkCache::new(48, Duration::from_secs(600)).unwrap())
}

fn open(storages: &[Arc<dyn CloudStorage>], seed: u64) -> Engine {
    Engine::open(
        config(),
        storages.to_vec(),
        cache(),
        Arc::new(SeededRandom::new(seed)),
    )
    .expect("open engine")
}

fn local_backends(root: &Path, n: usize) -> Vec<Arc<dyn CloudStorage>> {
    (0..n)
        .map(|i| {
            let backend = LocalFsBackend::open(format!("cloud{i}"), root.join(format!("cloud{i}")))
                .expect("local backend");
            Arc::new(backend) as Arc<dyn CloudStorage>
        })
        .collect()
}

/// Chain + RandomPadding/NoPadding set, protected and saved.
fn provision(storages: &[Arc<dyn CloudStorage>]) -> SetId {
    let mut engine = open(storages, 1);
    engine.set_master_password(SecretString::from(PASSWORD));
    let chain = engine.create_key_chain().unwrap();
    let keys = engine.create_encryption_keys(2).unwrap();
    let set = engine
        .create_encryption_set(
            vec![
                EncryptionLayer::new(AES_CBC, RANDOM_PADDING, 32, keys[0]),
                EncryptionLayer::new(AES_CBC, NO_PADDING, 32, keys[1]),
            ],
            chain,
        )
        .unwrap();
    engine.save_catalogs().unwrap();
    set
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

#[test]
fn roundtrip_edge_sizes_across_reopen() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 3);
    let set = provision(&storages);

    let sizes = [0usize, 1, 15, 16, 17, 16 * 8, 16 * 8 - 1, 1000];
    {
        let mut engine = open(&storages, 2);
        engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();
        for len in sizes {
            let local = dir.path().join(format!("plain-{len}"));
            std::fs::write(&local, payload(len)).unwrap();
            let written = engine
                .encrypt_file_to_remote(set, &local, len % 3, &format!("data/file-{len}"))
                .unwrap();
            assert!(written >= 16 + 16 * 4, "header plus two IVs and blocks");
        }
    }

    let mut engine = open(&storages, 3);
    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();
    for len in sizes {
        let remote = format!("data/file-{len}");
        assert_eq!(engine.remote_file_set(len % 3, &remote).unwrap(), set);
        let mut out = Vec::new();
        let n = engine.decrypt_remote_file(len % 3, &remote, &mut out).unwrap();
        assert_eq!(n as usize, len);
        assert_eq!(out, payload(len), "size {len}");
    }
}

#[test]
fn same_plaintext_encrypts_differently() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 2);
    let set = provision(&storages);
    let mut engine = open(&storages, 4);
    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();

    let local = dir.path().join("plain");
    std::fs::write(&local, payload(64)).unwrap();
    engine.encrypt_file_to_remote(set, &local, 0, "a").unwrap();
    engine.encrypt_file_to_remote(set, &local, 0, "b").unwrap();
    let a = storages[0].read_all("a").unwrap();
    let b = storages[0].read_all("b").unwrap();
    assert_eq!(a[..16], b[..16], "same set header");
    assert_ne!(a[16..], b[16..]);

    for name in ["a", "b"] {
        let mut out = Vec::new();
        engine.decrypt_remote_file(0, name, &mut out).unwrap();
        assert_eq!(out, payload(64));
    }
}

#[test]
fn overwrite_with_shorter_file() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 2);
    let set = provision(&storages);
    let mut engine = open(&storages, 5);
    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();

    let local = dir.path().join("plain");
    std::fs::write(&local, payload(500)).unwrap();
    engine.encrypt_file_to_remote(set, &local, 1, "f").unwrap();
    std::fs::write(&local, payload(3)).unwrap();
    engine.encrypt_file_to_remote(set, &local, 1, "f").unwrap();

    let mut out = Vec::new();
    engine.decrypt_remote_file(1, "f", &mut out).unwrap();
    assert_eq!(out, payload(3));
}

#[test]
fn paths_differing_only_in_case_stay_distinct() {
    let dir = TempDir::new().unwrap();
    let storages: Vec<Arc<dyn CloudStorage>> = vec![Arc::new(MemoryStorage::new("m0"))];
    let set = provision(&storages);
    let mut engine = open(&storages, 11);
    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();

    let local = dir.path().join("plain");
    std::fs::write(&local, [b'A'; 300]).unwrap();
    engine.encrypt_file_to_remote(set, &local, 0, "docs/Report.bin").unwrap();
    std::fs::write(&local, [b'B'; 300]).unwrap();
    engine.encrypt_file_to_remote(set, &local, 0, "docs/report.bin").unwrap();

    let mut upper = Vec::new();
    engine.decrypt_remote_file(0, "docs/Report.bin", &mut upper).unwrap();
    assert_eq!(upper, vec![b'A'; 300]);
    let mut lower = Vec::new();
    engine.decrypt_remote_file(0, "docs/report.bin", &mut lower).unwrap();
    assert_eq!(lower, vec![b'B'; 300]);
}

#[test]
fn wrong_password_then_right_password() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 3);
    let set = provision(&storages);
    let mut engine = open(&storages, 6);

    let err = engine
        .unlock_keys(set, &SecretString::from("not the password"))
        .unwrap_err();
    assert!(matches!(err, ShardError::Authentication(_)), "got {err}");
    assert!(!engine.is_unlocked(set));
    assert!(matches!(
        engine.build_pipeline(set, false),
        Err(ShardError::Configuration(_))
    ));

    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();
    assert!(engine.is_unlocked(set));
    // a second unlock has nothing to load and succeeds whatever the password
    engine.unlock_keys(set, &SecretString::from("ignored")).unwrap();
}

#[test]
fn tampered_catalog_is_rejected() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 2);
    provision(&storages);

    let path = "CloudSecurity/Configuration/EncryptionSets";
    let mut bytes = storages[0].read_all(path).unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 0x01;
    storages[0].write_all(path, &bytes).unwrap();

    let err = Engine::open(config(), storages, cache(), Arc::new(SeededRandom::new(7)))
        .err()
        .expect("tampered catalog must fail");
    assert!(matches!(err, ShardError::Format(_)), "got {err}");
}

#[test]
fn catalog_bound_to_backend_identities() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 2);
    provision(&storages);

    // a different second backend changes the tag key
    let other = local_backends(&dir.path().join("elsewhere"), 1);
    let mixed = vec![storages[0].clone(), other[0].clone()];
    assert!(matches!(
        Engine::open(config(), mixed, cache(), Arc::new(SeededRandom::new(8))),
        Err(ShardError::Format(_))
    ));
}

#[test]
fn offline_backend_error_propagates_without_partial_unlock() {
    let stores: Vec<MemoryStorage> = (0..3).map(|i| MemoryStorage::new(format!("m{i}"))).collect();
    let storages: Vec<Arc<dyn CloudStorage>> = stores
        .iter()
        .map(|s| Arc::new(s.clone()) as Arc<dyn CloudStorage>)
        .collect();
    let set = provision(&storages);
    let mut engine = open(&storages, 9);

    stores[2].set_offline(true);
    let err = engine
        .unlock_keys(set, &SecretString::from(PASSWORD))
        .unwrap_err();
    assert!(matches!(err, ShardError::Backend(_)), "got {err}");
    assert!(!engine.is_unlocked(set));

    stores[2].set_offline(false);
    engine.unlock_keys(set, &SecretString::from(PASSWORD)).unwrap();
}

#[test]
fn decrypt_with_unknown_set_header_fails() {
    let dir = TempDir::new().unwrap();
    let storages = local_backends(dir.path(), 1);
    provision(&storages);
    let mut engine = open(&storages, 10);

    let mut bogus = vec![0xAAu8; 16];
    bogus.extend_from_slice(&[0u8; 64]);
    storages[0].write_all("bogus", &bogus).unwrap();
    let mut out = Vec::new();
    assert!(matches!(
        engine.decrypt_remote_file(0, "bogus", &mut out),
        Err(ShardError::Configuration(_))
    ));

    storages[0].write_all("short", b"tiny").unwrap();
    assert!(matches!(
        engine.remote_file_set(0, "short"),
        Err(ShardError::Format(_))
    ));
}
