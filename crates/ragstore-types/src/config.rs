//! Configuration loading for ragstore.
//!
//! Layered config: defaults -> config file -> env vars.
//! Default config file lives at ~/.config/ragstore/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

fn default_true() -> bool {
    true
}

fn data_dir(name: &str) -> String {
    ProjectDirs::from("", "", "ragstore")
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(".").join(name))
        .to_string_lossy()
        .to_string()
}

/// L1 query-embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached query embeddings.
    #[serde(default = "default_query_maxsize")]
    pub maxsize: usize,
}

fn default_query_maxsize() -> usize {
    1_000
}

impl Default for QueryCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            maxsize: default_query_maxsize(),
        }
    }
}

/// L2 document-embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding one record file per document plus `index.json`.
    #[serde(default = "default_document_cache_dir")]
    pub cache_dir: String,

    /// Decoded vectors kept in memory.
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,

    /// Record files kept on disk.
    #[serde(default = "default_disk_capacity")]
    pub disk_capacity: usize,
}

fn default_document_cache_dir() -> String {
    data_dir("embeddings")
}

fn default_hot_capacity() -> usize {
    1_000
}

fn default_disk_capacity() -> usize {
    10_000
}

impl Default for DocumentCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: default_document_cache_dir(),
            hot_capacity: default_hot_capacity(),
            disk_capacity: default_disk_capacity(),
        }
    }
}

impl DocumentCacheSettings {
    /// Cache directory with a leading `~/` expanded.
    pub fn expanded_cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }
}

/// L3 result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached results.
    #[serde(default = "default_result_maxsize")]
    pub maxsize: usize,

    /// Entry lifetime in seconds; `None` disables expiry.
    #[serde(default = "default_result_ttl")]
    pub ttl_secs: Option<f64>,
}

fn default_result_maxsize() -> usize {
    500
}

fn default_result_ttl() -> Option<f64> {
    Some(3600.0)
}

impl Default for ResultCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            maxsize: default_result_maxsize(),
            ttl_secs: default_result_ttl(),
        }
    }
}

impl ResultCacheSettings {
    /// TTL as a `Duration`. Negative or non-finite values disable expiry.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Settings for all three cache tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub query: QueryCacheSettings,

    #[serde(default)]
    pub document: DocumentCacheSettings,

    #[serde(default)]
    pub result: ResultCacheSettings,
}

impl CacheSettings {
    /// All tiers disabled; useful as a base for tests enabling one tier.
    pub fn disabled() -> Self {
        let mut settings = Self::default();
        settings.query.enabled = false;
        settings.document.enabled = false;
        settings.result.enabled = false;
        settings
    }
}

/// Incremental index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Directory for `checkpoint_v{version}.json` snapshots.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Save a checkpoint after every structural mutation.
    #[serde(default = "default_true")]
    pub auto_checkpoint: bool,

    /// Fragmentation ratio at which removals trigger compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Number of checkpoint files kept on disk.
    #[serde(default = "default_checkpoint_retention")]
    pub checkpoint_retention: usize,
}

fn default_checkpoint_dir() -> String {
    data_dir("checkpoints")
}

fn default_compaction_threshold() -> f64 {
    0.2
}

fn default_checkpoint_retention() -> usize {
    3
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            auto_checkpoint: true,
            compaction_threshold: default_compaction_threshold(),
            checkpoint_retention: default_checkpoint_retention(),
        }
    }
}

impl IndexSettings {
    /// Checkpoint directory with a leading `~/` expanded.
    pub fn expanded_checkpoint_dir(&self) -> PathBuf {
        expand_home(&self.checkpoint_dir)
    }
}

/// Main settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub index: IndexSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            index: IndexSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/ragstore/config.toml)
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (RAGSTORE_*, `__` between nested keys,
    ///    e.g. `RAGSTORE_CACHE__QUERY__MAXSIZE`)
    pub fn load(config_path: Option<&str>) -> Result<Self, StoreError> {
        let config_dir = ProjectDirs::from("", "", "ragstore")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("cache.document.cache_dir", default_document_cache_dir())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("index.checkpoint_dir", default_checkpoint_dir())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("index.compaction_threshold", default_compaction_threshold())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAGSTORE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.cache.query.maxsize == 0 {
            return Err(StoreError::Config("cache.query.maxsize must be > 0".into()));
        }
        if self.cache.document.hot_capacity == 0 || self.cache.document.disk_capacity == 0 {
            return Err(StoreError::Config(
                "cache.document capacities must be > 0".into(),
            ));
        }
        if self.cache.result.maxsize == 0 {
            return Err(StoreError::Config("cache.result.maxsize must be > 0".into()));
        }
        let threshold = self.index.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(StoreError::Config(format!(
                "index.compaction_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.index.checkpoint_retention == 0 {
            return Err(StoreError::Config(
                "index.checkpoint_retention must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.cache.query.maxsize, 1_000);
        assert_eq!(settings.cache.document.hot_capacity, 1_000);
        assert_eq!(settings.cache.document.disk_capacity, 10_000);
        assert_eq!(settings.cache.result.maxsize, 500);
        assert_eq!(settings.index.checkpoint_retention, 3);
        assert!((settings.index.compaction_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(settings.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_result_ttl() {
        let mut result = ResultCacheSettings::default();
        assert_eq!(result.ttl(), Some(Duration::from_secs(3600)));

        result.ttl_secs = Some(0.1);
        assert_eq!(result.ttl(), Some(Duration::from_millis(100)));

        result.ttl_secs = None;
        assert_eq!(result.ttl(), None);

        result.ttl_secs = Some(-1.0);
        assert_eq!(result.ttl(), None);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.cache.query.maxsize = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.compaction_threshold = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.checkpoint_retention = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ragstore.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[cache.query]
maxsize = 42

[cache.result]
enabled = false

[index]
checkpoint_retention = 5
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.cache.query.maxsize, 42);
        assert!(!settings.cache.result.enabled);
        assert_eq!(settings.index.checkpoint_retention, 5);
        // Untouched sections keep their defaults
        assert_eq!(settings.cache.document.hot_capacity, 1_000);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let decoded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.cache.query.maxsize, settings.cache.query.maxsize);
        assert_eq!(decoded.index.checkpoint_dir, settings.index.checkpoint_dir);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        let expanded = expand_home("~/cache");
        assert!(expanded.ends_with("cache"));
    }
}
