//! HTTP fetch client with per-domain limits and response caching.
//!
//! ### Request path
//! - Cacheable requests (GET without `Cache-Control: no-cache`) are answered
//!   from the response cache when a fresh entry exists
//! - Otherwise wait for the matching rule's concurrency slot and delay
//! - Send, then let the header check veto the body before it is read
//! - Read at most `max_body_size` bytes; unwrap gzip payloads served as files
//! - Write responses with status < 500 back to the cache, best effort
//!
//! ### robots.txt Compliance
//! - Fetch and cache `robots.txt` per host (24h cache), see [`RobotsCache`].

pub mod limits;
pub mod robots;
pub mod url;

use std::io::Read;
use std::time::{Duration, Instant};

use reqwest::Client;
use wayfarer_core::{Error, Headers, Method, Request, Response, ResponseCache};

pub use self::limits::{DomainRule, LimitRule, Limits};
pub use self::robots::RobotsCache;
pub use self::url::{canonicalize, normalize};

/// Callback run once status and headers are known; returning `false` aborts
/// the transfer before the body is read.
pub type HeaderCheck = dyn Fn(&Request, u16, &Headers) -> bool + Send + Sync;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "wayfarer/<version>")
    pub user_agent: String,

    /// Maximum response body size in bytes; 0 reads everything (default: 10MB)
    pub max_body_size: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 10)
    pub max_redirects: usize,

    /// Apply the rule delay to cache hits too (default: false)
    pub delay_on_cache_hit: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("wayfarer/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_size: 10 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 10,
            delay_on_cache_hit: false,
        }
    }
}

/// HTTP client wrapper applying domain limits and the response cache.
#[derive(Debug)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
    limits: Limits,
    cache: Option<ResponseCache>,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, limits: Limits::default(), cache: None })
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// The underlying HTTP client, for auxiliary fetches such as robots.txt.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Perform `request`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// [`Error::AbortedAfterHeaders`] when `check` vetoes the body, and
    /// [`Error::Http`] for network failures. Non-2xx statuses are returned
    /// as responses, not errors.
    pub async fn fetch(&self, request: &Request, check: Option<&HeaderCheck>) -> Result<Response, Error> {
        let rule = self.limits.rule_for(request).await;

        if let Some(hit) = self.cached(request).await {
            if self.config.delay_on_cache_hit {
                rule.pause().await;
            }
            return Ok(hit);
        }

        let _slot = rule.acquire().await;
        rule.pause().await;
        let response = self.send(request, check).await?;

        if let Some(cache) = &self.cache
            && is_cacheable(request)
            && response.status < 500
            && let Err(e) = cache.set(&response).await
        {
            tracing::warn!(request_id = request.id, url = %request.url, error = %e, "cache write failed");
        }

        Ok(response)
    }

    async fn cached(&self, request: &Request) -> Option<Response> {
        let cache = self.cache.as_ref()?;
        if !is_cacheable(request) {
            return None;
        }
        match cache.get(request.url.as_str()).await {
            Ok(Some(mut hit)) => {
                tracing::debug!(request_id = request.id, url = %request.url, "served from cache");
                hit.request = request.clone();
                Some(hit)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(request_id = request.id, url = %request.url, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn send(&self, request: &Request, check: Option<&HeaderCheck>) -> Result<Response, Error> {
        let method = to_reqwest_method(request.method);
        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let tracer = request.tracer();
        let started = Instant::now();
        if let Some(tracer) = tracer {
            tracer.request_sent(request);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("network error: {e}")))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        if let Some(tracer) = tracer {
            tracer.headers_received(request, status, started.elapsed());
        }

        if let Some(check) = check
            && !check(request, status, &headers)
        {
            // Dropping the response closes the connection without draining it.
            return Err(Error::AbortedAfterHeaders(request.url.to_string()));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Http(format!("failed to read response: {e}")))?
        {
            let max = self.config.max_body_size;
            if max > 0 && body.len() + chunk.len() > max {
                body.extend_from_slice(&chunk[..max - body.len()]);
                tracing::debug!(request_id = request.id, url = %request.url, max, "response body truncated");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        if let Some(tracer) = tracer {
            tracer.body_read(request, body.len(), started.elapsed());
        }

        let body = gunzip_if_needed(request, &headers, body)?;

        tracing::debug!(
            request_id = request.id,
            collector_id = request.collector_id,
            url = %request.url,
            status,
            bytes = body.len(),
            fetch_ms = started.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(Response::new(request.clone(), status, headers, body))
    }
}

fn is_cacheable(request: &Request) -> bool {
    request.method == Method::Get && !request.no_cache()
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Decompress bodies that are gzip files rather than gzip-encoded transfers.
///
/// reqwest already undoes `Content-Encoding: gzip`; this handles payloads
/// served as `application/gzip` or from `.gz` paths.
fn gunzip_if_needed(request: &Request, headers: &Headers, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    let gzip_type = headers.get("content-type").is_some_and(|ct| ct.to_ascii_lowercase().contains("gzip"));
    let gzip_path = request.url.path().ends_with(".gz");
    if !(gzip_type || gzip_path) || !body.starts_with(&GZIP_MAGIC) {
        return Ok(body);
    }
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(body.as_slice()).read_to_end(&mut decoded)?;
    Ok(decoded)
}
