use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ShardError, ShardResult};

/// Top-level configuration (loaded from shard.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    /// Local-directory backends, one per "cloud"
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Remote prefix under which all engine state lives (default: CloudSecurity)
    pub root: String,
    /// PBKDF2-HMAC-SHA256 iterations for key envelopes (default: 2048)
    pub kdf_iterations: u32,
    /// Length of every generated KeyMaterial buffer (default: 510)
    pub key_material_len: usize,
    /// Random bytes in each integrity probe, before the digest (default: 512)
    pub probe_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Chunk size in bytes (default: 1 MiB)
    pub chunk_size: usize,
    /// Entry validity in seconds (default: 86400 = one day)
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Display name used in logs
    pub name: String,
    /// Directory acting as this backend's storage root
    pub path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: "CloudSecurity".into(),
            kdf_iterations: 2048,
            key_material_len: 510,
            probe_len: 512,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            ttl_secs: 86_400,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl ShardConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> ShardResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ShardConfig = toml::from_str(&content)
            .map_err(|e| ShardError::Configuration(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ShardResult<()> {
        if self.cache.chunk_size == 0 {
            return Err(ShardError::Configuration("cache.chunk_size must be > 0".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ShardError::Configuration("cache.ttl_secs must be > 0".into()));
        }
        if self.engine.key_material_len < 32 {
            return Err(ShardError::Configuration(format!(
                "engine.key_material_len must be at least 32, got {}",
                self.engine.key_material_len
            )));
        }
        if self.engine.kdf_iterations == 0 {
            return Err(ShardError::Configuration(
                "engine.kdf_iterations must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[engine]
root = "Vault"
kdf_iterations = 4096
key_material_len = 1022
probe_len = 256

[cache]
chunk_size = 65536
ttl_secs = 3600

[logging]
level = "debug"
format = "json"

[[backends]]
name = "cloud0"
path = "/srv/cloud0"

[[backends]]
name = "cloud1"
path = "/srv/cloud1"
"#;
        let config: ShardConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.engine.root, "Vault");
        assert_eq!(config.engine.kdf_iterations, 4096);
        assert_eq!(config.engine.key_material_len, 1022);
        assert_eq!(config.engine.probe_len, 256);
        assert_eq!(config.cache.chunk_size, 65536);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].path, PathBuf::from("/srv/cloud1"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: ShardConfig = toml::from_str("").unwrap();

        assert_eq!(config.engine.root, "CloudSecurity");
        assert_eq!(config.engine.kdf_iterations, 2048);
        assert_eq!(config.engine.key_material_len, 510);
        assert_eq!(config.engine.probe_len, 512);
        assert_eq!(config.cache.chunk_size, 1024 * 1024);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.logging.level, "info");
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[cache]
chunk_size = 4096
"#;
        let config: ShardConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.cache.chunk_size, 4096);
        // Defaults
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.engine.root, "CloudSecurity");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ShardConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ShardConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.engine.root, parsed.engine.root);
        assert_eq!(config.cache.chunk_size, parsed.cache.chunk_size);
        assert_eq!(config.logging.level, parsed.logging.level);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = ShardConfig::default();
        config.cache.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ShardError::Configuration(_))));

        let mut config = ShardConfig::default();
        config.engine.key_material_len = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShardConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.engine.kdf_iterations, 2048);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.toml");
        std::fs::write(&path, "[engine]\nprobe_len = 64\n").unwrap();
        let config = ShardConfig::load(&path).unwrap();
        assert_eq!(config.engine.probe_len, 64);

        std::fs::write(&path, "[cache]\nttl_secs = 0\n").unwrap();
        assert!(ShardConfig::load(&path).is_err());
    }
}
