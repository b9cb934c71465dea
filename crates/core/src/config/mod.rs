//! Crawler configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WAYFARER_*, nested keys split on `__`)
//! 2. TOML config file (if WAYFARER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

use crate::Error;
use crate::cache::{ByDuration, ByHeader, Expiration, Never, ResponseCache};
use crate::storage::{
    ByteStore, FsStore, MemoryQueue, MemoryStore, QueueStore, SledStore, SqliteStore, StoragePools,
};
use crate::visits::{MemoryVisits, VisitStore};

/// Where cached responses are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    None,
    Memory,
    Fs,
    Sled,
    Sqlite,
}

/// Where visit counters and the dispatch queue are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sled,
    Sqlite,
}

/// Accepted input forms of [`ExpirationSetting`].
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RawExpiration {
    Seconds(u64),
    Text(String),
}

/// Cache expiration strategy: `"header"`, `"never"` or a lifetime in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawExpiration", into = "String")]
pub enum ExpirationSetting {
    #[default]
    Header,
    Never,
    Seconds(u64),
}

impl TryFrom<RawExpiration> for ExpirationSetting {
    type Error = String;

    fn try_from(raw: RawExpiration) -> Result<Self, Self::Error> {
        match raw {
            RawExpiration::Seconds(secs) => Ok(Self::Seconds(secs)),
            RawExpiration::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "header" => Ok(Self::Header),
                "never" => Ok(Self::Never),
                other => other
                    .parse()
                    .map(Self::Seconds)
                    .map_err(|_| format!("expected `header`, `never` or seconds, got `{text}`")),
            },
        }
    }
}

impl From<ExpirationSetting> for String {
    fn from(setting: ExpirationSetting) -> Self {
        match setting {
            ExpirationSetting::Header => "header".into(),
            ExpirationSetting::Never => "never".into(),
            ExpirationSetting::Seconds(secs) => secs.to_string(),
        }
    }
}

impl ExpirationSetting {
    pub fn build(&self) -> Result<Arc<dyn Expiration>, Error> {
        Ok(match self {
            ExpirationSetting::Header => Arc::new(ByHeader),
            ExpirationSetting::Never => Arc::new(Never),
            ExpirationSetting::Seconds(secs) => Arc::new(ByDuration::new(Duration::from_secs(*secs))?),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Directory (fs, sled) or database file (sqlite).
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub expiration: ExpirationSetting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Crawler configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WAYFARER_*)
/// 2. TOML config file (if WAYFARER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Deepest link level followed from a seed; 0 disables the limit.
    #[serde(default)]
    pub max_depth: u32,

    /// Bytes read from a response body before truncating; 0 disables the cap.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub ignore_robots_txt: bool,

    /// Domain globs a request must match (any of) when non-empty.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    #[serde(default)]
    pub disallowed_domains: Vec<String>,

    /// URL regexes a request must match (any of) when non-empty.
    #[serde(default)]
    pub url_filters: Vec<String>,

    #[serde(default)]
    pub disallowed_url_filters: Vec<String>,

    /// How many times a URL may be dispatched again; unset allows any.
    #[serde(default)]
    pub max_revisits: Option<u64>,

    /// Concurrent requests per domain; 0 is unlimited.
    #[serde(default)]
    pub parallelism: usize,

    #[serde(default)]
    pub delay_ms: u64,

    /// Upper bound of the random extra delay added to `delay_ms`.
    #[serde(default)]
    pub random_delay_ms: u64,

    /// Apply the per-domain delay to cache hits as well.
    #[serde(default)]
    pub delay_on_cache_hit: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_user_agent() -> String {
    concat!("wayfarer/", env!("CARGO_PKG_VERSION")).into()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_depth: 0,
            max_body_size: default_max_body_size(),
            timeout_ms: default_timeout_ms(),
            ignore_robots_txt: false,
            allowed_domains: Vec::new(),
            disallowed_domains: Vec::new(),
            url_filters: Vec::new(),
            disallowed_url_filters: Vec::new(),
            max_revisits: None,
            parallelism: 0,
            delay_ms: 0,
            random_delay_ms: 0,
            delay_on_cache_hit: false,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Backends selected by a [`CrawlConfig`].
pub struct Stores {
    pub visits: Arc<dyn VisitStore>,
    pub queue: Arc<dyn QueueStore>,
    pub cache: Option<ResponseCache>,
}

impl CrawlConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn random_delay(&self) -> Duration {
        Duration::from_millis(self.random_delay_ms)
    }

    /// The layered sources without extracting them.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYFARER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("WAYFARER_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Load configuration from all sources with layered precedence.
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

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Open the configured visit store, dispatch queue and response cache.
    ///
    /// Backends pointing at the same file share one handle through `pools`.
    pub async fn open_stores(&self, pools: &StoragePools) -> Result<Stores, Error> {
        let (visits, queue): (Arc<dyn VisitStore>, Arc<dyn QueueStore>) = match self.storage.backend {
            StorageBackend::Memory => (Arc::new(MemoryVisits::new()), Arc::new(MemoryQueue::new())),
            StorageBackend::Sled => {
                let store = Arc::new(SledStore::open(&pools.sled, required(&self.storage.path)?).await?);
                (store.clone(), store)
            }
            StorageBackend::Sqlite => {
                let store = Arc::new(SqliteStore::open(&pools.sqlite, required(&self.storage.path)?).await?);
                (store.clone(), store)
            }
        };

        let bytes: Option<Arc<dyn ByteStore>> = match self.cache.backend {
            CacheBackend::None => None,
            CacheBackend::Memory => Some(Arc::new(MemoryStore::new())),
            CacheBackend::Fs => Some(Arc::new(FsStore::open(required(&self.cache.path)?).await?)),
            CacheBackend::Sled => Some(Arc::new(SledStore::open(&pools.sled, required(&self.cache.path)?).await?)),
            CacheBackend::Sqlite => {
                Some(Arc::new(SqliteStore::open(&pools.sqlite, required(&self.cache.path)?).await?))
            }
        };
        let cache = match bytes {
            Some(storage) => {
                Some(ResponseCache::builder().storage(storage).expiration(self.cache.expiration.build()?).build()?)
            }
            None => None,
        };

        tracing::debug!(
            storage = ?self.storage.backend,
            cache = ?self.cache.backend,
            "opened crawl storage"
        );
        Ok(Stores { visits, queue, cache })
    }
}

fn required(path: &Option<PathBuf>) -> Result<&PathBuf, Error> {
    path.as_ref().ok_or(Error::BlankPath)
}
