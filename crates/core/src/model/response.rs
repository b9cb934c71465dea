use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Context, Headers, Request};

/// A fetched page, derived from its [`Request`] and the raw HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request: Request,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// `None` means the headers impose no expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the response was replayed from the cache.
    #[serde(default)]
    pub cached: bool,
}

impl Response {
    pub fn new(request: Request, status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self::at(request, status, headers, body, Utc::now())
    }

    /// Build a response as if it had been received at `created_at`.
    pub fn at(request: Request, status: u16, headers: Headers, body: Vec<u8>, created_at: DateTime<Utc>) -> Self {
        let expires_at = header_expiry(&headers, created_at);
        Self { request, status, headers, body, created_at, expires_at, cached: false }
    }

    pub fn ctx(&self) -> &Context {
        &self.request.ctx
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn is_html(&self) -> bool {
        self.content_type().is_some_and(|ct| ct.to_ascii_lowercase().contains("html"))
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Compute when a response stops being fresh according to its headers.
///
/// `Cache-Control` wins over `Expires`; `s-maxage` wins over `max-age`;
/// `no-cache`/`no-store` make the response stale immediately. Both freshness
/// sources are reduced by the `Age` header. Negative or malformed ages are
/// ignored. A lifetime too far in the future to represent never expires; an
/// age too large to subtract means already expired.
pub fn header_expiry(headers: &Headers, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let age = headers
        .get("age")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| i64::try_from(secs).ok().and_then(Duration::try_seconds));
    let age = match age {
        Some(Some(age)) => age,
        Some(None) => return Some(DateTime::<Utc>::MIN_UTC),
        None => Duration::zero(),
    };

    let mut max_age = None;
    let mut shared_max_age = None;
    for directive in headers.get_all("cache-control").iter().flat_map(|v| v.split(',')) {
        let directive = directive.trim().to_ascii_lowercase();
        if directive == "no-cache" || directive == "no-store" {
            return Some(DateTime::<Utc>::MIN_UTC);
        }
        if let Some(value) = directive.strip_prefix("s-maxage=") {
            shared_max_age = value.trim().parse::<i64>().ok();
        } else if let Some(value) = directive.strip_prefix("max-age=") {
            max_age = value.trim().parse::<i64>().ok();
        }
    }

    if let Some(seconds) = shared_max_age.or(max_age) {
        let ttl = Duration::try_seconds(seconds)?;
        return match ttl.checked_sub(&age) {
            Some(ttl) => now
                .checked_add_signed(ttl)
                .or_else(|| (ttl < Duration::zero()).then_some(DateTime::<Utc>::MIN_UTC)),
            None => Some(DateTime::<Utc>::MIN_UTC),
        };
    }

    let expires = headers.get("expires")?;
    match DateTime::parse_from_rfc2822(expires.trim()) {
        Ok(at) => Some(at.with_timezone(&Utc).checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)),
        // Unparseable dates such as "0" mean already expired.
        Err(_) => Some(DateTime::<Utc>::MIN_UTC),
    }
}
