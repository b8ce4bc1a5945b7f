//! Provider configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! storage_path = "/var/cache/app"
//! capacity_bytes = 1048576
//! flush_delay_ms = 500
//! worker_name = "disk-cache-worker"
//! ```
//!
//! Only `storage_path` is required.

mod defaults;

pub use defaults::{
    default_flush_delay, DEFAULT_CAPACITY_BYTES, DEFAULT_FLUSH_DELAY_MS, DEFAULT_WORKER_NAME,
    MAX_FLUSH_DELAY_MS,
};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("storage_path must not be empty")]
    EmptyStoragePath,

    #[error("capacity_bytes must be greater than 0")]
    ZeroCapacity,

    #[error("flush_delay_ms must be in [0, {max}], got {value}")]
    FlushDelayOutOfBounds { value: u64, max: u64 },

    #[error("worker_name must not be empty")]
    EmptyWorkerName,
}

/// Settings for building an LRU-backed cache provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Directory holding the cache files
    pub storage_path: PathBuf,

    /// Maximum total payload size in bytes (default: 10 MiB)
    #[serde(default = "defaults::capacity_bytes")]
    pub capacity_bytes: u64,

    /// Delay used by coalesced flushes (default: 500)
    #[serde(default = "defaults::flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Name of the lifecycle worker thread
    #[serde(default = "defaults::worker_name")]
    pub worker_name: String,
}

impl ProviderConfig {
    /// Config with defaults for everything but the storage path.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check bounds on every value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStoragePath);
        }

        if self.capacity_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.flush_delay_ms > MAX_FLUSH_DELAY_MS {
            return Err(ConfigError::FlushDelayOutOfBounds {
                value: self.flush_delay_ms,
                max: MAX_FLUSH_DELAY_MS,
            });
        }

        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerName);
        }

        Ok(())
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = ProviderConfig::from_toml_str(r#"storage_path = "/tmp/cache""#).unwrap();
        assert_eq!(config, ProviderConfig::new("/tmp/cache"));
        assert_eq!(config.flush_delay(), default_flush_delay());
    }

    #[test]
    fn test_full_toml() {
        let config = ProviderConfig::from_toml_str(
            r#"
            storage_path = "/data/cache"
            capacity_bytes = 1048576
            flush_delay_ms = 250
            worker_name = "cache-io"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_path, PathBuf::from("/data/cache"));
        assert_eq!(config.capacity_bytes, 1_048_576);
        assert_eq!(config.flush_delay(), Duration::from_millis(250));
        assert_eq!(config.worker_name, "cache-io");
    }

    #[test]
    fn test_missing_storage_path_is_parse_error() {
        let result = ProviderConfig::from_toml_str("capacity_bytes = 10");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ProviderConfig::from_toml_str(
            r#"
            storage_path = "/tmp/cache"
            eviction = "fifo"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_bounds() {
        let base = ProviderConfig::new("/tmp/cache");

        assert!(matches!(
            base.clone().with_capacity_bytes(0).validate(),
            Err(ConfigError::ZeroCapacity)
        ));

        let mut config = base.clone();
        config.flush_delay_ms = MAX_FLUSH_DELAY_MS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FlushDelayOutOfBounds { .. })
        ));

        let mut config = base.clone();
        config.worker_name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyWorkerName)));

        assert!(matches!(
            ProviderConfig::new("").validate(),
            Err(ConfigError::EmptyStoragePath)
        ));

        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_zero_flush_delay_allowed() {
        let config = ProviderConfig::new("/tmp/cache").with_flush_delay(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.toml");
        fs::write(&path, "storage_path = \"/tmp/x\"\ncapacity_bytes = 42\n").unwrap();

        let config = ProviderConfig::load(&path).unwrap();
        assert_eq!(config.capacity_bytes, 42);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ProviderConfig::load(Path::new("/nonexistent/cache.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
