use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use super::{Headers, Tracer, UrlParser};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value scratch space shared by a request, its response and the
/// requests followed from it.
///
/// Clones share storage; use [`Context::detached`] for an independent copy.
#[derive(Debug, Clone, Default)]
pub struct Context(Arc<DashMap<String, String>>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.0.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of the current values with its own storage.
    pub fn detached(&self) -> Self {
        Self(Arc::new(self.snapshot().into_iter().collect()))
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.0.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(Self(Arc::new(values.into_iter().collect())))
    }
}

/// A request scheduled by a collector.
///
/// Immutable after dispatch except for the abort flag, which a request
/// callback may set to cancel the transfer before it is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonic per collector.
    pub id: u64,
    pub collector_id: u64,
    /// Zero for seeds, parent depth + 1 for followed links.
    pub depth: u32,
    pub method: Method,
    pub url: Url,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    /// Character encoding to assume instead of the one the server declares.
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub ctx: Context,
    #[serde(skip)]
    parser: Option<Arc<dyn UrlParser>>,
    #[serde(skip)]
    tracer: Option<Arc<dyn Tracer>>,
    #[serde(skip)]
    aborted: Arc<AtomicBool>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: 0,
            collector_id: 0,
            depth: 0,
            method,
            url,
            headers: Headers::new(),
            body: None,
            charset: None,
            ctx: Context::new(),
            parser: None,
            tracer: None,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_ctx(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn UrlParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn has_parser(&self) -> bool {
        self.parser.is_some()
    }

    pub fn has_tracer(&self) -> bool {
        self.tracer.is_some()
    }

    pub fn tracer(&self) -> Option<&dyn Tracer> {
        self.tracer.as_deref()
    }

    /// Hostname of the target, empty for host-less URLs.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Cancel the request. Only effective before it is sent.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Whether the request asks caches to be bypassed.
    pub fn no_cache(&self) -> bool {
        self.headers
            .get_all("cache-control")
            .iter()
            .any(|v| v.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
    }

    /// Resolve `href` against this request's URL.
    ///
    /// Fragment-only and empty references resolve to `None`.
    pub fn absolute_url(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let resolved = match &self.parser {
            Some(parser) => parser.parse_ref(&self.url, href).ok(),
            None => self.url.join(href).ok(),
        };
        resolved.map(|mut url| {
            url.set_fragment(None);
            url
        })
    }

    /// A GET request for `url` one level deeper, sharing this request's context.
    pub fn child(&self, url: Url) -> Self {
        Self {
            id: 0,
            collector_id: self.collector_id,
            depth: self.depth + 1,
            method: Method::Get,
            url,
            headers: Headers::new(),
            body: None,
            charset: self.charset.clone(),
            ctx: self.ctx.clone(),
            parser: self.parser.clone(),
            tracer: self.tracer.clone(),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fresh copy for re-dispatch: new abort flag, same target and context.
    pub fn retry_copy(&self) -> Self {
        Self { aborted: Arc::new(AtomicBool::new(false)), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WhatwgParser;

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_child_increments_depth_and_shares_ctx() {
        let parent = request("https://example.com/").with_depth(2);
        parent.ctx.put("k", "v");
        let child = parent.child(Url::parse("https://example.com/a").unwrap());
        assert_eq!(child.depth, 3);
        assert_eq!(child.ctx.get("k").as_deref(), Some("v"));
        child.ctx.put("k2", "v2");
        assert_eq!(parent.ctx.get("k2").as_deref(), Some("v2"));
    }

    #[test]
    fn test_abort_flag_shared_by_clones() {
        let req = request("https://example.com/");
        let clone = req.clone();
        clone.abort();
        assert!(req.is_aborted());
        assert!(!req.retry_copy().is_aborted());
    }

    #[test]
    fn test_absolute_url() {
        let req = request("https://example.com/docs/index.html");
        assert_eq!(req.absolute_url("page.html").unwrap().as_str(), "https://example.com/docs/page.html");
        assert_eq!(req.absolute_url("/top#frag").unwrap().as_str(), "https://example.com/top");
        assert!(req.absolute_url("#section").is_none());
        assert!(req.absolute_url("  ").is_none());
    }

    #[test]
    fn test_absolute_url_with_parser() {
        let req = request("https://example.com/a/").with_parser(Arc::new(WhatwgParser));
        assert!(req.has_parser());
        assert_eq!(req.absolute_url("b").unwrap().as_str(), "https://example.com/a/b");
    }

    #[test]
    fn test_no_cache_directive() {
        let req = request("https://example.com/").with_header("Cache-Control", "max-age=0, no-cache");
        assert!(req.no_cache());
        assert!(!request("https://example.com/").no_cache());
    }

    #[test]
    fn test_serde_round_trip_keeps_ctx() {
        let req = request("https://example.com/").with_depth(1).with_body("x=1");
        req.ctx.put("page", "1");
        let bytes = serde_json::to_vec(&req).unwrap();
        let decoded: Request = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.url, req.url);
        assert_eq!(decoded.depth, 1);
        assert_eq!(decoded.body.as_deref(), Some(b"x=1".as_slice()));
        assert_eq!(decoded.ctx.get("page").as_deref(), Some("1"));
    }

    #[test]
    fn test_detached_ctx_is_independent() {
        let ctx = Context::new();
        ctx.put("a", "1");
        let copy = ctx.detached();
        copy.put("b", "2");
        assert!(ctx.get("b").is_none());
        assert_eq!(copy.len(), 2);
    }
}
