//! robots.txt compliance with caching.
//!
//! Fetches and caches robots.txt files per origin, respecting a 24-hour TTL.
//! A missing robots.txt (4xx) allows everything; server errors and network
//! failures are returned to the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use robotstxt_rs::RobotsTxt;
use tokio::sync::RwLock;
use url::Url;
use wayfarer_core::{Error, Rejection};

/// Default TTL for robots.txt cache (24 hours).
const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum size of robots.txt to fetch (1MB).
const MAX_ROBOTS_SIZE: usize = 1024 * 1024;

struct CachedRobots {
    robots: RobotsTxt,
    fetched_at: Instant,
}

impl CachedRobots {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > ROBOTS_TTL
    }
}

/// Per-origin robots.txt cache sharing the fetch client's HTTP connection pool.
pub struct RobotsCache {
    cache: RwLock<HashMap<String, CachedRobots>>,
    user_agent: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for RobotsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsCache").field("user_agent", &self.user_agent).finish_non_exhaustive()
    }
}

impl RobotsCache {
    pub fn new(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self { cache: RwLock::new(HashMap::new()), user_agent: user_agent.into(), http }
    }

    /// Reject `url` with [`Rejection::RobotsDisallowed`] when robots.txt forbids it.
    pub async fn check(&self, url: &Url) -> Result<(), Error> {
        if self.is_allowed(url).await? {
            Ok(())
        } else {
            Err(Error::rejected(Rejection::RobotsDisallowed, url.as_str()))
        }
    }

    /// Whether our user agent may fetch `url`, fetching robots.txt on a miss.
    pub async fn is_allowed(&self, url: &Url) -> Result<bool, Error> {
        let robots_url = robots_url(url)?;

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&robots_url)
                && !cached.is_expired()
            {
                return Ok(cached.robots.can_fetch(&self.user_agent, url.as_str()));
            }
        }

        let robots = self.fetch_robots(&robots_url).await?;
        let allowed = robots.can_fetch(&self.user_agent, url.as_str());
        tracing::debug!(robots_url = %robots_url, url = %url, allowed, "robots.txt fetched");

        // Misses are once per origin and TTL, so sweeping here bounds the map.
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| !cached.is_expired());
        cache.insert(robots_url, CachedRobots { robots, fetched_at: Instant::now() });
        Ok(allowed)
    }

    async fn fetch_robots(&self, url: &str) -> Result<RobotsTxt, Error> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| Error::Http(format!("failed to fetch robots.txt: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!(robots_url = url, status = status.as_u16(), "no robots.txt, allowing all");
            return Ok(RobotsTxt::parse(""));
        }
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        if let Some(len) = response.content_length()
            && len as usize > MAX_ROBOTS_SIZE
        {
            return Err(Error::Http(format!("robots.txt too large: {len} bytes")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("failed to read robots.txt: {e}")))?;
        let content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_ROBOTS_SIZE)]);
        Ok(RobotsTxt::parse(&content))
    }

    /// Drop entries past their TTL.
    pub async fn cleanup_expired(&self) {
        self.cache.write().await.retain(|_, cached| !cached.is_expired());
    }
}

fn robots_url(url: &Url) -> Result<String, Error> {
    let host = url.host_str().ok_or_else(|| Error::InvalidUrl(format!("missing host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}/robots.txt", url.scheme()),
        None => format!("{}://{host}/robots.txt", url.scheme()),
    })
}
