//! Engine configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (DOCCACHE_*)
//! 2. TOML config file (if DOCCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Shortest accepted master poll interval.
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 60;

/// External program that turns a master document into a derived one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Program to run; receives the document on stdin.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Engine configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (DOCCACHE_*, nested keys split on `__`)
/// 2. TOML config file (if DOCCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one subdirectory (and one archive) per cache.
    ///
    /// Set via DOCCACHE_CACHE_ROOT environment variable.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Name of the master cache.
    #[serde(default = "default_master_name")]
    pub master_name: String,

    /// Suffix of every entry file, including the dot.
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Derived caches by name.
    ///
    /// Set via DOCCACHE_CACHES__<NAME>__COMMAND and friends, or a
    /// `[caches.<name>]` table in the config file.
    #[serde(default)]
    pub caches: BTreeMap<String, TransformConfig>,

    /// Base URL of the remote document service.
    ///
    /// Set via DOCCACHE_SOURCE_URL environment variable.
    #[serde(default)]
    pub source_url: Option<String>,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Remote request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between master polls. Raised to 60 if lower.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Seconds the fetch loop waits before its first pass.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Seconds between scheduled snapshot builds of one cache.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Pause after each archived file during scheduled builds.
    #[serde(default = "default_snapshot_pause_ms")]
    pub snapshot_pause_ms: u64,

    /// How long the apply loop blocks on an empty queue.
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./doccache")
}

fn default_master_name() -> String {
    "xml".into()
}

fn default_file_extension() -> String {
    ".xml".into()
}

fn default_user_agent() -> String {
    "doccache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_update_interval_secs() -> u64 {
    600
}

fn default_startup_delay_secs() -> u64 {
    55
}

fn default_snapshot_interval_secs() -> u64 {
    86_400
}

fn default_snapshot_pause_ms() -> u64 {
    50
}

fn default_queue_wait_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            master_name: default_master_name(),
            file_extension: default_file_extension(),
            caches: BTreeMap::new(),
            source_url: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            update_interval_secs: default_update_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            snapshot_pause_ms: default_snapshot_pause_ms(),
            queue_wait_ms: default_queue_wait_ms(),
        }
    }
}

impl EngineConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Master poll interval, never below [`MIN_UPDATE_INTERVAL_SECS`].
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(MIN_UPDATE_INTERVAL_SECS))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn snapshot_pause(&self) -> Duration {
        Duration::from_millis(self.snapshot_pause_ms)
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `DOCCACHE_`
    /// 2. TOML file from `DOCCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack [`EngineConfig::load`] extracts from.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("DOCCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("DOCCACHE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Root directory of the named cache.
    pub fn cache_dir(&self, name: &str) -> PathBuf {
        self.cache_root.join(name)
    }

    /// Check if the source URL is available (for deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the source URL is not set.
    pub fn require_source_url(&self) -> Result<&str, ConfigError> {
        self.source_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "source_url".into(),
            hint: "Set DOCCACHE_SOURCE_URL environment variable".into(),
        })
    }
}
