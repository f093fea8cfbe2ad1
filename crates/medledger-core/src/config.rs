//! Engine configuration.
//!
//! Values come from an optional `config/medledger.toml` and from
//! `MEDLEDGER__SECTION__KEY` environment variables, which win over the file.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::db::{PoolOptions, StoreLocation};

const DEFAULT_CONFIG_FILE: &str = "config/medledger.toml";
const ENV_PREFIX: &str = "MEDLEDGER";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Store file path, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long a writer waits for the store lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// How long a caller waits for a pooled connection.
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,
}

fn default_db_path() -> String {
    "medledger.db".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_timeout_ms() -> u64 {
    2_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_timeout_ms: default_pool_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            pool_size: 1,
            ..Self::default()
        }
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            location: StoreLocation::parse(&self.path),
            size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            checkout_timeout: Duration::from_millis(self.pool_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_formulary_ttl_secs")]
    pub formulary_ttl_secs: u64,
    /// Also used for the per-ward MAR.
    #[serde(default = "default_inventory_ttl_secs")]
    pub inventory_ttl_secs: u64,
}

fn default_formulary_ttl_secs() -> u64 {
    300
}

fn default_inventory_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            formulary_ttl_secs: default_formulary_ttl_secs(),
            inventory_ttl_secs: default_inventory_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn formulary_ttl(&self) -> Duration {
        Duration::from_secs(self.formulary_ttl_secs)
    }

    pub fn inventory_ttl(&self) -> Duration {
        Duration::from_secs(self.inventory_ttl_secs)
    }
}

impl EngineConfig {
    /// Load from `config/medledger.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from a specific file (optional) and the environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Configuration for a throwaway in-memory engine.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::in_memory(),
            cache: CacheConfig::default(),
        }
    }
}
