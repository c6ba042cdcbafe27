//! Configuration validation rules.
//!
//! This module provides validation logic for `EngineConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{EngineConfig, MIN_UPDATE_INTERVAL_SECS};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

/// Whether `name` can be used as a single directory component.
fn is_dir_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

impl EngineConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `master_name` or a derived cache name is not a plain directory name
    /// - a derived cache reuses the master's name or has an empty command
    /// - `file_extension` does not start with a dot
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `snapshot_interval_secs` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_dir_name(&self.master_name) {
            return Err(ConfigError::Invalid {
                field: "master_name".into(),
                reason: "must be a non-empty name made of [A-Za-z0-9_-]".into(),
            });
        }

        for (name, transform) in &self.caches {
            if name == &self.master_name {
                return Err(ConfigError::Invalid {
                    field: format!("caches.{name}"),
                    reason: "derived cache must not reuse the master name".into(),
                });
            }
            if !is_dir_name(name) {
                return Err(ConfigError::Invalid {
                    field: format!("caches.{name}"),
                    reason: "cache name must be made of [A-Za-z0-9_-]".into(),
                });
            }
            if transform.command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("caches.{name}.command"),
                    reason: "must not be empty".into(),
                });
            }
        }

        if self.file_extension.len() < 2 || !self.file_extension.starts_with('.') || self.file_extension.contains('/')
        {
            return Err(ConfigError::Invalid {
                field: "file_extension".into(),
                reason: "must start with '.' and name a suffix".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "snapshot_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.update_interval_secs < MIN_UPDATE_INTERVAL_SECS {
            tracing::warn!(
                configured = self.update_interval_secs,
                applied = MIN_UPDATE_INTERVAL_SECS,
                "update_interval_secs below minimum; using the minimum"
            );
        }

        Ok(())
    }
}
