//! shard: multi-backend fragmented encryption CLI
//!
//! Commands:
//!   init                         - create a key chain and the default two-layer set
//!   create-set --padding <name>  - create a key chain and a set with the given layers
//!   sets                         - list encryption sets
//!   encrypt <local> <remote>     - encrypt a local file onto a backend
//!   decrypt <remote> <local>     - decrypt a remote file to a local path
//!   config show                  - display current configuration
//!
//! The master password comes from SHARD_PASSWORD or an interactive prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shard_core::config::ShardConfig;
use shard_core::logging::{init_logging, LogFormat};
use shard_core::types::SetId;
use shard_core::OsRandom;
use shard_engine::registry::{AES_CBC, NO_PADDING, RANDOM_PADDING};
use shard_engine::{EncryptionLayer, Engine};
use shard_storage::{CloudStorage, LocalFsBackend, MemoryChunkCache};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "shard",
    version,
    about = "Encrypt files across several mutually distrusting storage backends"
)]
struct Cli {
    /// Path to shard.toml configuration file
    #[arg(long, short = 'c', env = "SHARD_CONFIG", default_value = "shard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a key chain and a RandomPadding + NoPadding AES-CBC set
    Init,

    /// Create a key chain and a set with one AES-CBC layer per --padding
    #[command(name = "create-set")]
    CreateSet {
        /// Padding per layer, outermost first (RandomPadding, NoPadding)
        #[arg(long = "padding", required = true)]
        paddings: Vec<String>,
    },

    /// List encryption sets
    Sets,

    /// Encrypt a local file onto a backend
    Encrypt {
        /// Local plaintext file
        local: PathBuf,
        /// Destination path on the backend
        remote: String,
        /// Encryption set id (default: the only set)
        #[arg(long, short = 's')]
        set: Option<SetId>,
        /// Backend index from the config
        #[arg(long, short = 'b', default_value_t = 0)]
        backend: usize,
    },

    /// Decrypt a remote file to a local path
    Decrypt {
        /// Encrypted file path on the backend
        remote: String,
        /// Local destination
        local: PathBuf,
        /// Backend index from the config
        #[arg(long, short = 'b', default_value_t = 0)]
        backend: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ShardConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let format: LogFormat = config
        .logging
        .format
        .parse()
        .context("parsing logging.format")?;
    init_logging(&config.logging.level, format);

    match cli.command {
        Commands::Init => cmd_create_set(&config, &[RANDOM_PADDING.into(), NO_PADDING.into()]),
        Commands::CreateSet { paddings } => cmd_create_set(&config, &paddings),
        Commands::Sets => cmd_sets(&config),
        Commands::Encrypt {
            local,
            remote,
            set,
            backend,
        } => cmd_encrypt(&config, &local, &remote, set, backend),
        Commands::Decrypt {
            remote,
            local,
            backend,
        } => cmd_decrypt(&config, &remote, &local, backend),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Engine setup ──────────────────────────────────────────────────────────────

fn open_engine(config: &ShardConfig) -> Result<Engine> {
    if config.backends.is_empty() {
        anyhow::bail!("no backends configured: add [[backends]] entries to the config");
    }
    let storages = config
        .backends
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let name = if b.name.is_empty() {
                format!("backend{i}")
            } else {
                b.name.clone()
            };
            LocalFsBackend::open(name, &b.path)
                .map(|backend| Arc::new(backend) as Arc<dyn CloudStorage>)
                .with_context(|| format!("opening backend at {}", b.path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let cache = MemoryChunkCache::new(config.cache.chunk_size, config.cache.ttl())
        .context("creating chunk cache")?;
    Engine::open(
        config.engine.clone(),
        storages,
        Arc::new(cache),
        Arc::new(OsRandom),
    )
    .context("opening engine")
}

/// Master password from SHARD_PASSWORD, else prompt on the terminal.
fn read_password() -> Result<SecretString> {
    if let Ok(password) = std::env::var("SHARD_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password =
        rpassword::prompt_password("Master password: ").context("reading master password")?;
    Ok(SecretString::from(password))
}

// ── `shard init` / `shard create-set` ─────────────────────────────────────────

fn cmd_create_set(config: &ShardConfig, paddings: &[String]) -> Result<()> {
    let mut engine = open_engine(config)?;
    engine.set_master_password(read_password()?);

    let chain = engine.create_key_chain()?;
    let keys = engine.create_encryption_keys(paddings.len())?;
    let layers = paddings
        .iter()
        .zip(keys)
        .map(|(padding, key)| EncryptionLayer::new(AES_CBC, padding.as_str(), 32, key))
        .collect();
    let set = engine
        .create_encryption_set(layers, chain)
        .context("creating encryption set")?;
    engine.save_catalogs().context("protecting keys and saving catalogs")?;

    println!("created encryption set {set}");
    println!("  key chain: {chain}");
    println!("  layers:    {}", paddings.join(" -> "));
    Ok(())
}

// ── `shard sets` ──────────────────────────────────────────────────────────────

fn cmd_sets(config: &ShardConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let mut any = false;
    for set in engine.sets() {
        any = true;
        let layers: Vec<String> = set
            .layers
            .iter()
            .map(|l| format!("{}/{}", l.cipher, l.padding))
            .collect();
        println!("{}  chain={}  layers={}", set.id, set.key_chain, layers.join(","));
    }
    if !any {
        println!("no encryption sets (run `shard init`)");
    }
    Ok(())
}

// ── `shard encrypt` ───────────────────────────────────────────────────────────

fn pick_set(engine: &Engine, requested: Option<SetId>) -> Result<SetId> {
    if let Some(id) = requested {
        return Ok(id);
    }
    let ids: Vec<SetId> = engine.sets().map(|s| s.id).collect();
    match ids.as_slice() {
        [only] => Ok(*only),
        [] => anyhow::bail!("no encryption sets; run `shard init` first"),
        _ => anyhow::bail!("{} encryption sets exist; choose one with --set", ids.len()),
    }
}

fn cmd_encrypt(
    config: &ShardConfig,
    local: &Path,
    remote: &str,
    set: Option<SetId>,
    backend: usize,
) -> Result<()> {
    let mut engine = open_engine(config)?;
    let set = pick_set(&engine, set)?;
    engine
        .unlock_keys(set, &read_password()?)
        .context("unlocking keys")?;

    let written = engine
        .encrypt_file_to_remote(set, local, backend, remote)
        .with_context(|| format!("encrypting {}", local.display()))?;
    println!("encrypted {} -> {remote} ({written} bytes)", local.display());
    Ok(())
}

// ── `shard decrypt` ───────────────────────────────────────────────────────────

fn cmd_decrypt(config: &ShardConfig, remote: &str, local: &Path, backend: usize) -> Result<()> {
    let mut engine = open_engine(config)?;
    let set = engine
        .remote_file_set(backend, remote)
        .with_context(|| format!("reading header of {remote}"))?;
    engine
        .unlock_keys(set, &read_password()?)
        .context("unlocking keys")?;

    let file = File::create(local).with_context(|| format!("creating {}", local.display()))?;
    let mut out = BufWriter::new(file);
    let written = engine
        .decrypt_remote_file(backend, remote, &mut out)
        .with_context(|| format!("decrypting {remote}"))?;
    out.flush().context("flushing output")?;
    println!("decrypted {remote} -> {} ({written} bytes)", local.display());
    Ok(())
}

// ── `shard config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &ShardConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
