//! Content-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Compute the cache key for a URL: hex-encoded SHA-256 of the exact string.
///
/// Callers canonicalize first if equivalent spellings should share an entry.
pub fn compute_cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}
