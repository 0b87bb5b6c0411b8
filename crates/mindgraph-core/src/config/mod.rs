//! Configuration management with file persistence

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "MINDGRAPH_CONFIG_DIR";

/// Mindgraph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub idempotency: IdempotencyConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Connection discovery tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Minimum score for a connection (inclusive)
    pub similarity_threshold: f64,
    /// Connections proposed per node
    pub max_connections: usize,
    /// Hard ceiling on `max_connections`
    pub max_connections_cap: usize,
    /// Weight of the tag-overlap bonus
    pub tag_bonus: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            max_connections: 5,
            max_connections_cap: 10,
            tag_bonus: 0.1,
        }
    }
}

/// Optimistic-lock retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Query-side cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Idempotency record retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_hours: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// Request size limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Items accepted by one bulk command
    pub max_bulk_items: usize,
    /// Page size used when the caller gives none
    pub default_page_size: usize,
    /// Largest page a caller may request
    pub max_page_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_bulk_items: 100,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// SQLite store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; `None` selects the platform data directory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mindgraph_core=info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("mindgraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, or defaults if missing
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let analyzer = &self.analyzer;
        if !(0.0..=1.0).contains(&analyzer.similarity_threshold) {
            return Err(anyhow!("analyzer.similarity_threshold must be between 0.0 and 1.0"));
        }
        if !(0.0..=1.0).contains(&analyzer.tag_bonus) {
            return Err(anyhow!("analyzer.tag_bonus must be between 0.0 and 1.0"));
        }
        if analyzer.max_connections_cap == 0 {
            return Err(anyhow!("analyzer.max_connections_cap must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(anyhow!("cache.capacity must be at least 1 when the cache is enabled"));
        }
        if self.idempotency.ttl_hours <= 0 {
            return Err(anyhow!("idempotency.ttl_hours must be positive"));
        }
        if self.limits.max_bulk_items == 0 {
            return Err(anyhow!("limits.max_bulk_items must be at least 1"));
        }
        if self.limits.default_page_size == 0
            || self.limits.default_page_size > self.limits.max_page_size
        {
            return Err(anyhow!(
                "limits.default_page_size must be between 1 and limits.max_page_size"
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.analyzer.similarity_threshold, 0.3);
        assert_eq!(config.analyzer.max_connections, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(100));
        assert_eq!(config.idempotency.ttl(), chrono::Duration::hours(24));
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [analyzer]
            similarity_threshold = 0.5

            [cache]
            ttl_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.analyzer.similarity_threshold, 0.5);
        assert_eq!(config.analyzer.max_connections, 5);
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml_str("[analyzer]\nsimilarity_threshold = 1.5").is_err());
        assert!(Config::from_toml_str("[retry]\nmax_attempts = 0").is_err());
        assert!(Config::from_toml_str("[limits]\ndefault_page_size = 500").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.analyzer.max_connections = 7;
        config.storage.path = Some(dir.path().join("graph.db"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
