//! Pluggable collaborators a request may carry.

use std::fmt;
use std::time::Duration;

use url::Url;

use super::Request;
use crate::Error;

/// Resolves raw and relative links into absolute URLs.
pub trait UrlParser: Send + Sync + fmt::Debug {
    fn parse(&self, raw: &str) -> Result<Url, Error>;

    fn parse_ref(&self, base: &Url, reference: &str) -> Result<Url, Error>;
}

/// WHATWG URL parsing as implemented by the `url` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatwgParser;

impl UrlParser for WhatwgParser {
    fn parse(&self, raw: &str) -> Result<Url, Error> {
        Ok(Url::parse(raw.trim())?)
    }

    fn parse_ref(&self, base: &Url, reference: &str) -> Result<Url, Error> {
        Ok(base.join(reference.trim())?)
    }
}

/// Observes the timing of an outgoing request. Never alters control flow.
pub trait Tracer: Send + Sync + fmt::Debug {
    fn request_sent(&self, _request: &Request) {}

    fn headers_received(&self, _request: &Request, _status: u16, _elapsed: Duration) {}

    fn body_read(&self, _request: &Request, _bytes: usize, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whatwg_parse_ref() {
        let base = Url::parse("https://example.com/a/b.html").unwrap();
        let url = WhatwgParser.parse_ref(&base, "../c.html").unwrap();
        assert_eq!(url.as_str(), "https://example.com/c.html");
    }

    #[test]
    fn test_whatwg_parse_invalid() {
        assert!(matches!(WhatwgParser.parse("not a url"), Err(Error::InvalidUrl(_))));
    }
}
