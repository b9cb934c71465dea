//! URL canonicalization for visit keys and cache keys.

use url::Url;
use wayfarer_core::Error;

/// Canonicalize a user-supplied URL before it is dispatched.
///
/// 1. Trim surrounding whitespace
/// 2. Default the scheme to `https://` when none is given
/// 3. Lowercase the host
/// 4. Drop the fragment
///
/// The query string is kept as is. Only `http` and `https` are accepted.
pub fn canonicalize(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty URL".into()));
    }

    let with_scheme = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let url = Url::parse(&with_scheme)?;
    normalize(url)
}

/// Apply the canonical form to an already parsed URL, e.g. a resolved link.
pub fn normalize(mut url: Url) -> Result<Url, Error> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(Error::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("missing host: {url}")));
    }

    if let Some(host) = url.host_str().map(str::to_lowercase) {
        url.set_host(Some(&host))?;
    }
    url.set_fragment(None);
    Ok(url)
}
