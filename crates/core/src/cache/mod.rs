//! Response cache over pluggable byte storage.
//!
//! Entries are keyed by a SHA-256 of the request URL and hold the whole
//! serialized [`Response`] (request included). Expiry is lazy: an expired
//! entry reads as a miss but stays in storage until removed.

pub mod expiration;
pub mod hash;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::model::Response;
use crate::storage::ByteStore;

pub use expiration::{ByDate, ByDuration, ByHeader, Expiration, Never};
pub use hash::compute_cache_key;

/// Stored form of a cached response.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    payload: Response,
}

/// Builder for [`ResponseCache`]; both parts are required.
#[derive(Default)]
pub struct ResponseCacheBuilder {
    storage: Option<Arc<dyn ByteStore>>,
    expiration: Option<Arc<dyn Expiration>>,
}

impl ResponseCacheBuilder {
    pub fn storage(mut self, storage: Arc<dyn ByteStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn expiration(mut self, expiration: Arc<dyn Expiration>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn build(self) -> Result<ResponseCache, Error> {
        Ok(ResponseCache {
            storage: self.storage.ok_or(Error::MissingStorage)?,
            expiration: self.expiration.ok_or(Error::MissingExpiration)?,
        })
    }
}

/// Cache of fetched responses.
#[derive(Clone)]
pub struct ResponseCache {
    storage: Arc<dyn ByteStore>,
    expiration: Arc<dyn Expiration>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn builder() -> ResponseCacheBuilder {
        ResponseCacheBuilder::default()
    }

    /// Store `response` under its request URL, replacing any previous entry.
    pub async fn set(&self, response: &Response) -> Result<(), Error> {
        let key = compute_cache_key(response.request.url.as_str());
        let entry = CacheEntry {
            key: key.clone(),
            created_at: response.created_at,
            expires_at: response.expires_at,
            payload: response.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.storage.put(&key, bytes).await?;
        tracing::debug!(url = %response.request.url, key, "cache stored");
        Ok(())
    }

    /// Look up the response for `url`.
    ///
    /// Returns `Ok(None)` both when nothing is stored and when the stored
    /// entry has expired.
    pub async fn get(&self, url: &str) -> Result<Option<Response>, Error> {
        self.get_at(url, Utc::now()).await
    }

    /// [`ResponseCache::get`] evaluated as of `now`.
    pub async fn get_at(&self, url: &str, now: DateTime<Utc>) -> Result<Option<Response>, Error> {
        let key = compute_cache_key(url);
        let Some(bytes) = self.storage.fetch(&key).await? else {
            tracing::debug!(url, "cache miss");
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        if self.expiration.is_expired(entry.created_at, entry.expires_at, now) {
            tracing::debug!(url, created_at = %entry.created_at, "cache entry expired");
            return Ok(None);
        }
        tracing::debug!(url, "cache hit");
        let mut response = entry.payload;
        response.cached = true;
        Ok(Some(response))
    }

    pub async fn remove(&self, url: &str) -> Result<(), Error> {
        self.storage.remove(&compute_cache_key(url)).await
    }

    pub async fn remove_all(&self) -> Result<(), Error> {
        self.storage.clear().await
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> Result<usize, Error> {
        self.storage.len().await
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }
}
