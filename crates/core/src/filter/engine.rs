//! Primitive predicates evaluated against one request attribute.
//!
//! An engine answers "does this segment match". What a match means (allow or
//! refuse) is decided by the policy set the engine is registered in; the
//! length, depth and revisit engines only make sense as exclusions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::model::Request;
use crate::visits::VisitStore;

/// Which attribute of a request a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Domain,
    Url,
    Depth,
    Request,
}

impl Scope {
    /// Extract this scope's segment from `request`.
    pub fn segment<'a>(&self, request: &'a Request) -> Segment<'a> {
        match self {
            Scope::Domain => Segment::Domain(request.host()),
            Scope::Url => Segment::Url(request.url.as_str()),
            Scope::Depth => Segment::Depth(request.depth),
            Scope::Request => Segment::Request(request),
        }
    }
}

/// The scope-specific value an engine is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum Segment<'a> {
    Domain(&'a str),
    Url(&'a str),
    Depth(u32),
    Request(&'a Request),
}

impl Segment<'_> {
    /// Textual form used by pattern and length engines.
    ///
    /// Depth has none; whole requests fall back to their URL.
    pub fn text(&self) -> Option<&str> {
        match self {
            Segment::Domain(s) | Segment::Url(s) => Some(s),
            Segment::Request(r) => Some(r.url.as_str()),
            Segment::Depth(_) => None,
        }
    }

    fn depth(&self) -> Option<u32> {
        match self {
            Segment::Depth(d) => Some(*d),
            Segment::Request(r) => Some(r.depth),
            _ => None,
        }
    }
}

/// A predicate over a [`Segment`].
#[async_trait]
pub trait Engine: Send + Sync + fmt::Debug {
    async fn matches(&self, segment: &Segment<'_>) -> bool;
}

fn non_blank<I, S>(patterns: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
}

/// Matches when any shell-style glob matches the segment.
#[derive(Debug, Clone, Default)]
pub struct GlobEngine {
    patterns: Vec<glob::Pattern>,
    invalid: Vec<String>,
}

impl GlobEngine {
    /// Compile every non-blank pattern. Invalid ones are recorded and skipped;
    /// see [`GlobEngine::validate`].
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut engine = Self::default();
        for pattern in non_blank(patterns) {
            match glob::Pattern::new(&pattern) {
                Ok(p) => engine.patterns.push(p),
                Err(e) => engine.invalid.push(format!("{pattern}: {e}")),
            }
        }
        engine
    }

    /// Fails with the whole batch of invalid patterns, if any.
    pub fn validate(&self) -> Result<(), Error> {
        if self.invalid.is_empty() { Ok(()) } else { Err(Error::InvalidPatterns(self.invalid.clone())) }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[async_trait]
impl Engine for GlobEngine {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        segment
            .text()
            .is_some_and(|text| self.patterns.iter().any(|p| p.matches(text)))
    }
}

/// Matches when any regular expression matches the segment.
#[derive(Debug, Clone)]
pub struct RegexEngine {
    set: RegexSet,
    invalid: Vec<String>,
}

impl RegexEngine {
    /// Compile every non-blank pattern. Invalid ones are recorded and skipped;
    /// see [`RegexEngine::validate`].
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for pattern in non_blank(patterns) {
            match Regex::new(&pattern) {
                Ok(_) => valid.push(pattern),
                Err(e) => invalid.push(format!("{pattern}: {e}")),
            }
        }
        // Members compile on their own but the combined set can still exceed
        // the size limit; then nothing is registered and every pattern is reported.
        let set = match RegexSet::new(&valid) {
            Ok(set) => set,
            Err(e) => {
                invalid.extend(valid.iter().map(|pattern| format!("{pattern}: {e}")));
                RegexSet::empty()
            }
        };
        Self { set, invalid }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.invalid.is_empty() { Ok(()) } else { Err(Error::InvalidPatterns(self.invalid.clone())) }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[async_trait]
impl Engine for RegexEngine {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        segment.text().is_some_and(|text| self.set.is_match(text))
    }
}

/// Matches when the segment length falls outside `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct UrlLengthEngine {
    pub min: usize,
    pub max: usize,
}

impl UrlLengthEngine {
    pub fn new(min: usize, max: usize) -> Result<Self, Error> {
        if min > max {
            return Err(Error::InvalidConfig(format!("url length range {min}..={max} is empty")));
        }
        Ok(Self { min, max })
    }
}

#[async_trait]
impl Engine for UrlLengthEngine {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        segment.text().is_some_and(|text| !(self.min..=self.max).contains(&text.len()))
    }
}

/// Matches when the request depth exceeds `max`.
#[derive(Debug, Clone, Copy)]
pub struct DepthEngine {
    pub max: u32,
}

impl DepthEngine {
    pub fn new(max: u32) -> Self {
        Self { max }
    }
}

#[async_trait]
impl Engine for DepthEngine {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        segment.depth().is_some_and(|d| d > self.max)
    }
}

/// Matches when the visit store has seen the segment more than `max` times.
///
/// Domain segments are counted per host, URL and request segments per URL.
pub struct RevisitEngine {
    store: Arc<dyn VisitStore>,
    max: u64,
}

impl RevisitEngine {
    pub fn new(store: Option<Arc<dyn VisitStore>>, max: u64) -> Result<Self, Error> {
        let store = store.ok_or(Error::MissingStorage)?;
        Ok(Self { store, max })
    }
}

impl fmt::Debug for RevisitEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisitEngine").field("max", &self.max).finish_non_exhaustive()
    }
}

#[async_trait]
impl Engine for RevisitEngine {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        let Some(key) = segment.text() else {
            return false;
        };
        match self.store.past_visits(key).await {
            Ok(count) => count > self.max,
            Err(e) => {
                // Unknown history counts as visited.
                tracing::warn!(key, error = %e, "visit store lookup failed");
                true
            }
        }
    }
}

/// How a [`Combinator`] folds its engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    /// Anything else; never matches.
    Other(String),
}

impl From<&str> for Operator {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" | "&&" => Operator::And,
            "or" | "||" => Operator::Or,
            _ => Operator::Other(s.to_string()),
        }
    }
}

/// Logical AND/OR over a list of engines, short-circuiting in list order.
#[derive(Debug, Clone)]
pub struct Combinator {
    op: Operator,
    engines: Vec<Arc<dyn Engine>>,
}

impl Combinator {
    pub fn new(op: impl Into<Operator>, engines: Vec<Arc<dyn Engine>>) -> Result<Self, Error> {
        if engines.is_empty() {
            return Err(Error::NoEngine);
        }
        Ok(Self { op: op.into(), engines })
    }
}

#[async_trait]
impl Engine for Combinator {
    async fn matches(&self, segment: &Segment<'_>) -> bool {
        match &self.op {
            Operator::And => {
                for engine in &self.engines {
                    if !engine.matches(segment).await {
                        return false;
                    }
                }
                true
            }
            Operator::Or => {
                for engine in &self.engines {
                    if engine.matches(segment).await {
                        return true;
                    }
                }
                false
            }
            Operator::Other(op) => {
                tracing::warn!(op = %op, "unknown filter operator");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visits::MemoryVisits;
    use url::Url;

    fn request(url: &str, depth: u32) -> Request {
        Request::get(Url::parse(url).unwrap()).with_depth(depth)
    }

    #[tokio::test]
    async fn test_glob_matches_domain() {
        let engine = GlobEngine::new(["*.example.com", "  ", "example.org"]);
        assert!(engine.validate().is_ok());
        assert!(engine.matches(&Segment::Domain("docs.example.com")).await);
        assert!(engine.matches(&Segment::Domain("example.org")).await);
        assert!(!engine.matches(&Segment::Domain("example.net")).await);
        assert!(!engine.matches(&Segment::Depth(3)).await);
    }

    #[tokio::test]
    async fn test_invalid_globs_keep_valid_ones() {
        let engine = GlobEngine::new(["[", "*.rs", "a[b"]);
        match engine.validate() {
            Err(Error::InvalidPatterns(bad)) => assert_eq!(bad.len(), 2),
            other => panic!("expected InvalidPatterns, got {other:?}"),
        }
        assert!(engine.matches(&Segment::Url("lib.rs")).await);
    }

    #[tokio::test]
    async fn test_regex_engine() {
        let engine = RegexEngine::new([r"/blog/\d+", "(unclosed"]);
        assert!(matches!(engine.validate(), Err(Error::InvalidPatterns(ref bad)) if bad.len() == 1));
        assert!(engine.matches(&Segment::Url("https://example.com/blog/42")).await);
        assert!(!engine.matches(&Segment::Url("https://example.com/about")).await);
    }

    #[test]
    fn test_oversized_regex_set_is_reported() {
        let huge = r"\w{1000}\d{1000}";
        let engine = RegexEngine::new((0..200).map(|i| format!("{huge}{i}")));
        match engine.validate() {
            Err(Error::InvalidPatterns(bad)) => assert!(!bad.is_empty()),
            other => panic!("expected InvalidPatterns, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_url_length_outside_range() {
        let engine = UrlLengthEngine::new(10, 30).unwrap();
        assert!(engine.matches(&Segment::Url("http://a")).await);
        assert!(!engine.matches(&Segment::Url("https://example.com/")).await);
        assert!(engine.matches(&Segment::Url("https://example.com/a/very/long/path")).await);
        assert!(UrlLengthEngine::new(5, 1).is_err());
    }

    #[tokio::test]
    async fn test_depth_engine() {
        let engine = DepthEngine::new(1);
        assert!(!engine.matches(&Segment::Depth(1)).await);
        assert!(engine.matches(&Segment::Depth(2)).await);
        let req = request("https://example.com/", 2);
        assert!(engine.matches(&Segment::Request(&req)).await);
    }

    #[tokio::test]
    async fn test_revisit_requires_store() {
        assert!(matches!(RevisitEngine::new(None, 0), Err(Error::MissingStorage)));
    }

    #[tokio::test]
    async fn test_revisit_engine() {
        let store = Arc::new(MemoryVisits::new());
        let engine = RevisitEngine::new(Some(store.clone()), 1).unwrap();
        let url = "https://example.com/";
        assert!(!engine.matches(&Segment::Url(url)).await);
        store.add_visit(url).await.unwrap();
        assert!(!engine.matches(&Segment::Url(url)).await);
        store.add_visit(url).await.unwrap();
        assert!(engine.matches(&Segment::Url(url)).await);
    }

    #[tokio::test]
    async fn test_combinator() {
        let short: Arc<dyn Engine> = Arc::new(UrlLengthEngine::new(0, 20).unwrap());
        let blog: Arc<dyn Engine> = Arc::new(RegexEngine::new(["blog"]));
        let seg = Segment::Url("https://example.com/blog/2024/post");

        let and = Combinator::new("and", vec![short.clone(), blog.clone()]).unwrap();
        assert!(and.matches(&seg).await);

        let or = Combinator::new("OR", vec![blog.clone()]).unwrap();
        assert!(!or.matches(&Segment::Url("https://example.com/")).await);

        let xor = Combinator::new("xor", vec![short, blog]).unwrap();
        assert!(!xor.matches(&seg).await);

        assert!(matches!(Combinator::new("and", vec![]), Err(Error::NoEngine)));
    }
}
