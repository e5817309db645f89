//! Typed settings for the cache, the optimistic manager and logging.
//!
//! Every section is optional in the TOML file; missing fields take the
//! defaults below.
//!
//! ```toml
//! [cache]
//! default_ttl_ms = 300000
//! max_size = 1000
//! storage_key = "app-cache"
//!
//! [optimistic]
//! max_retries = 3
//! auto_rollback = true
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::CacheError;

const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;
const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_STORAGE_KEY: &str = "app-cache";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_ROLLBACK_DELAY_MS: u64 = 1000;
const DEFAULT_SUCCESS_CLEANUP_DELAY_MS: u64 = 1000;

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheConfig,
    pub optimistic: OptimisticConfig,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a TOML file, layered over the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(toml: &str) -> Result<Self, CacheError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| CacheError::Config(e.to_string()))
    }
}

/// `CacheManager` configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one.
    pub default_ttl_ms: i64,
    /// Maximum number of entries. Clamped to at least 1.
    pub max_size: usize,
    /// Period of the background expiry sweep.
    pub cleanup_interval_ms: u64,
    /// Mirror the entry map into the durable store on every mutation.
    pub persist: bool,
    /// Reserved durable-store key holding the persisted document.
    pub storage_key: String,
    /// Reload from the durable store when another instance announces a write.
    pub sync_across_instances: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            max_size: DEFAULT_MAX_SIZE,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            persist: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            sync_across_instances: true,
        }
    }
}

impl CacheConfig {
    pub fn max_size_non_zero(&self) -> usize {
        self.max_size.max(1)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }
}

/// `OptimisticManager` configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// Failed attempts allowed before an update is marked as errored.
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub retry_delay_ms: u64,
    /// On exhausted retries, revert to the original data (`true`) or keep the
    /// failed update around for a "failed, retry?" affordance (`false`).
    pub auto_rollback: bool,
    /// How long a rolled-back update stays observable before removal.
    pub rollback_delay_ms: u64,
    /// How long a successful update stays observable before removal.
    pub success_cleanup_delay_ms: u64,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            auto_rollback: true,
            rollback_delay_ms: DEFAULT_ROLLBACK_DELAY_MS,
            success_cleanup_delay_ms: DEFAULT_SUCCESS_CLEANUP_DELAY_MS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Base level: trace|debug|info|warn|error.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = Settings::default();
        assert_eq!(settings.cache.default_ttl_ms, 300_000);
        assert_eq!(settings.cache.max_size, 1000);
        assert_eq!(settings.cache.cleanup_interval_ms, 60_000);
        assert_eq!(settings.cache.storage_key, "app-cache");
        assert!(settings.cache.persist);
        assert_eq!(settings.optimistic.max_retries, 3);
        assert_eq!(settings.optimistic.retry_delay_ms, 1000);
        assert!(settings.optimistic.auto_rollback);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [cache]
            max_size = 2

            [optimistic]
            auto_rollback = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.cache.max_size, 2);
        assert_eq!(settings.cache.default_ttl_ms, 300_000);
        assert!(!settings.optimistic.auto_rollback);
        assert_eq!(settings.optimistic.max_retries, 3);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newsdesk.toml");
        std::fs::write(&path, "[cache]\nstorage_key = \"tab-cache\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.cache.storage_key, "tab-cache");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Settings::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn max_size_clamps_to_one() {
        let config = CacheConfig {
            max_size: 0,
            ..Default::default()
        };
        assert_eq!(config.max_size_non_zero(), 1);
    }
}
