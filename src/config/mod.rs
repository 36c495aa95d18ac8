//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod storage;

pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ledger.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LEDGER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LEDGER_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Earning ingestion configuration.
    pub ingestion: IngestionConfig,
    /// Redemption de-duplication window.
    pub idempotency: IdempotencyConfig,
    /// Bucket definition cache.
    pub reference: ReferenceConfig,
    /// Partitioning and retention.
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `ledger.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.sqlite.path = ":memory:".to_string();
        config.storage.max_connections = 1;
        config
    }
}

/// Earning ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Records per sub-batch; one sub-batch is one transaction.
    pub batch_size: usize,
    /// Retries of a sub-batch after a contention timeout.
    pub max_retries: usize,
    /// Reject records whose bucket definition is unknown or inactive.
    /// Only effective when a definition cache is attached.
    pub check_definitions: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retries: 3,
            check_definitions: true,
        }
    }
}

/// Idempotency guard configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Window during which an identical request is suppressed.
    pub window_ms: u64,
    /// Maximum number of tracked fingerprints.
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            max_entries: 100_000,
        }
    }
}

/// Bucket definition cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Interval of the background refresh task.
    pub refresh_interval_secs: u64,
    /// Age after which a lookup forces a reload first.
    pub max_staleness_secs: u64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            max_staleness_secs: 300,
        }
    }
}

impl ReferenceConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs(self.max_staleness_secs)
    }
}

/// Partitioning and retention configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often the maintenance task runs.
    pub interval_secs: u64,
    /// Monthly partitions created ahead of the current month.
    pub months_ahead: u32,
    /// Account-hash sub-partitions per month (PostgreSQL).
    pub hash_partitions: u32,
    /// Months of log history kept before partitions are dropped.
    pub retention_months: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            months_ahead: 3,
            hash_partitions: 8,
            retention_months: 24,
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
