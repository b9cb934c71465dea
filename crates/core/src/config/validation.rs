//! Configuration validation rules.
//!
//! This module provides validation logic for `CrawlConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{CacheBackend, CrawlConfig, ExpirationSetting, StorageBackend};
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

impl CrawlConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `workers` or `queue_capacity` is 0
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is blank
    /// - the cache lifetime is 0 seconds
    ///
    /// Returns `ConfigError::Missing` for a persistent backend without a path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid { field: "workers".into(), reason: "must be greater than 0".into() });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity".into(),
                reason: "must be greater than 0".into(),
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

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.cache.expiration == ExpirationSetting::Seconds(0) {
            return Err(ConfigError::Invalid {
                field: "cache.expiration".into(),
                reason: "lifetime must be positive".into(),
            });
        }

        let cache_needs_path = !matches!(self.cache.backend, CacheBackend::None | CacheBackend::Memory);
        if cache_needs_path && self.cache.path.is_none() {
            return Err(ConfigError::Missing {
                field: "cache.path".into(),
                hint: "Set WAYFARER_CACHE__PATH environment variable".into(),
            });
        }
        if self.storage.backend != StorageBackend::Memory && self.storage.path.is_none() {
            return Err(ConfigError::Missing {
                field: "storage.path".into(),
                hint: "Set WAYFARER_STORAGE__PATH environment variable".into(),
            });
        }

        if !self.allowed_domains.is_empty() && !self.disallowed_domains.is_empty() {
            tracing::debug!(
                allowed = self.allowed_domains.len(),
                disallowed = self.disallowed_domains.len(),
                "both allowed and disallowed domains set; disallowed wins on overlap"
            );
        }

        Ok(())
    }
}
