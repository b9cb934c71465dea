//! Crawl orchestration.
//!
//! A [`Collector`] owns the policy filter, visit store, dispatch queue, worker
//! pool and fetch client, and fans responses out to registered callbacks.
//!
//! ### Dispatch
//! 1. Canonicalize the URL and stamp request and collector ids
//! 2. Evaluate the filter (exclusions first); rejections return to the caller
//! 3. Check robots.txt unless disabled
//! 4. Count the visit, atomically against the revisit limit, and push the
//!    request onto the dispatch queue lane; a failed push takes the visit back
//! 5. Hand queued requests to the worker pool, at most one per worker
//!
//! Followed links take the same path from inside a worker.

pub mod callbacks;
mod task;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, Notify};
use url::Url;
use wayfarer_core::filter::{DepthEngine, Policy, RevisitEngine, Scope};
use wayfarer_core::model::{Tracer, UrlParser};
use wayfarer_core::storage::StoragePools;
use wayfarer_core::{
    CrawlConfig, DispatchQueue, Error, Filter, Headers, Method, Rejection, Request, Response, VisitStore, WorkerPool,
    config::Stores,
};

use crate::extract::{HtmlElement, parse_selector};
use crate::fetch::{DomainRule, FetchClient, FetchConfig, Limits, RobotsCache, canonicalize, normalize};

pub use callbacks::{Callback, CallbackKey, Callbacks, Event};
use task::FetchTask;

/// Label of the revisit filter; retries evaluate every filter but this one.
pub const REVISIT_LABEL: &str = "revisit";

/// Label of the depth filter.
pub const DEPTH_LABEL: &str = "max-depth";

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Configures and builds a [`Collector`].
pub struct CollectorBuilder {
    config: CrawlConfig,
    stores: Option<Stores>,
    rules: Vec<DomainRule>,
    lane: u64,
    tracer: Option<Arc<dyn Tracer>>,
    parser: Option<Arc<dyn UrlParser>>,
}

impl CollectorBuilder {
    /// Use already opened stores instead of the ones `config` names.
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Add a per-domain politeness rule. Earlier rules win.
    pub fn rule(mut self, rule: DomainRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Dispatch queue lane this collector reads and writes.
    pub fn lane(mut self, lane: u64) -> Self {
        self.lane = lane;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn UrlParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Open storage, compile filters and start the worker pool.
    ///
    /// Requests left on the lane by an earlier run are picked up by the next
    /// [`Collector::visit`] or [`Collector::wait`].
    pub async fn build(self) -> Result<Collector, Error> {
        let config = self.config;
        let stores = match self.stores {
            Some(stores) => stores,
            None => config.open_stores(&StoragePools::default()).await?,
        };

        let filter = Filter::new();
        compile_filters(&filter, &config, &stores.visits).await?;

        let mut limits = Limits::new(
            DomainRule::default()
                .delay(config.delay())
                .random_delay(config.random_delay())
                .parallelism(config.parallelism),
        );
        for rule in self.rules {
            limits.push(rule).await?;
        }

        let mut client = FetchClient::new(FetchConfig {
            user_agent: config.user_agent.clone(),
            max_body_size: config.max_body_size,
            timeout: config.timeout(),
            delay_on_cache_hit: config.delay_on_cache_hit,
            ..Default::default()
        })?
        .with_limits(limits);
        if let Some(cache) = stores.cache {
            client = client.with_cache(cache);
        }

        let robots =
            (!config.ignore_robots_txt).then(|| RobotsCache::new(client.http().clone(), config.user_agent.clone()));
        let queue = DispatchQueue::new(stores.queue, config.queue_capacity)?;
        let leftover = queue.len(self.lane).await?;
        let pool = WorkerPool::new(config.workers, config.workers)?;
        pool.start();

        let id = NEXT_COLLECTOR_ID.fetch_add(1, Ordering::SeqCst);
        if leftover > 0 {
            tracing::info!(collector_id = id, lane = self.lane, leftover, "resuming queued requests");
        }

        Ok(Collector {
            inner: Arc::new(Inner {
                id,
                lane: self.lane,
                workers: config.workers,
                max_revisits: config.max_revisits,
                filter,
                visits: stores.visits,
                client,
                robots,
                queue,
                pool,
                callbacks: RwLock::new(Callbacks::new()),
                tracer: self.tracer,
                parser: self.parser,
                next_request_id: AtomicU64::new(1),
                pending: AtomicUsize::new(leftover),
                running: AtomicUsize::new(0),
                pump_lock: Mutex::new(()),
                idle: Notify::new(),
            }),
        })
    }
}

async fn compile_filters(filter: &Filter, config: &CrawlConfig, visits: &Arc<dyn VisitStore>) -> Result<(), Error> {
    let domains = [
        (Policy::Exclude, &config.disallowed_domains, Rejection::ForbiddenDomain, "disallowed-domains"),
        (Policy::Include, &config.allowed_domains, Rejection::ForbiddenDomain, "allowed-domains"),
    ];
    for (policy, globs, rejection, label) in domains {
        if !globs.is_empty() {
            let _ = filter.add_globs(policy, Scope::Domain, globs, rejection, Some(label)).await?;
        }
    }

    let urls = [
        (Policy::Exclude, &config.disallowed_url_filters, Rejection::ForbiddenUrl, "disallowed-urls"),
        (Policy::Include, &config.url_filters, Rejection::NoMatchingFilter, "url-filters"),
    ];
    for (policy, patterns, rejection, label) in urls {
        if !patterns.is_empty() {
            let _ = filter.add_regexes(policy, Scope::Url, patterns, rejection, Some(label)).await?;
        }
    }

    if config.max_depth > 0 {
        let engine = Arc::new(DepthEngine::new(config.max_depth));
        let _ = filter.add(Policy::Exclude, Scope::Depth, engine, Rejection::MaxDepth, Some(DEPTH_LABEL)).await;
    }
    if let Some(max) = config.max_revisits {
        let engine = Arc::new(RevisitEngine::new(Some(Arc::clone(visits)), max)?);
        let _ = filter.add(Policy::Exclude, Scope::Url, engine, Rejection::Revisited, Some(REVISIT_LABEL)).await;
    }
    Ok(())
}

pub(crate) struct Inner {
    id: u64,
    lane: u64,
    workers: usize,
    max_revisits: Option<u64>,
    filter: Filter,
    visits: Arc<dyn VisitStore>,
    client: FetchClient,
    robots: Option<RobotsCache>,
    queue: DispatchQueue,
    pool: WorkerPool,
    callbacks: RwLock<Callbacks>,
    tracer: Option<Arc<dyn Tracer>>,
    parser: Option<Arc<dyn UrlParser>>,
    next_request_id: AtomicU64,
    /// Requests queued or running.
    pending: AtomicUsize,
    /// Requests handed to the pool and not yet finished.
    running: AtomicUsize,
    pump_lock: Mutex<()>,
    idle: Notify,
}

impl Inner {
    /// Attach the collector-wide hooks that do not survive queue serialization.
    fn attach(&self, mut request: Request) -> Request {
        if let Some(parser) = &self.parser
            && !request.has_parser()
        {
            request = request.with_parser(Arc::clone(parser));
        }
        if let Some(tracer) = &self.tracer
            && !request.has_tracer()
        {
            request = request.with_tracer(Arc::clone(tracer));
        }
        request
    }

    async fn dispatch(self: &Arc<Self>, mut request: Request, tags: Option<&[&str]>) -> Result<(), Error> {
        request.url = normalize(request.url)?;
        request.id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        request.collector_id = self.id;

        if let Err(e) = self.filter.matches(&request, tags).await {
            tracing::debug!(
                request_id = request.id,
                collector_id = self.id,
                url = %request.url,
                reason = %e,
                "request rejected"
            );
            return Err(e);
        }
        if let Some(robots) = &self.robots {
            robots.check(&request.url).await?;
        }

        // The filter pass above is advisory for revisits; this claim is the one
        // that holds under concurrent dispatches of the same URL.
        let key = request.url.as_str();
        let limit = self.max_revisits.filter(|_| tags.is_none_or(|tags| tags.contains(&REVISIT_LABEL)));
        match limit {
            Some(max) => {
                if !self.visits.add_visit_within(key, max).await? {
                    tracing::debug!(request_id = request.id, collector_id = self.id, url = key, "request rejected");
                    return Err(Error::rejected(Rejection::Revisited, key));
                }
            }
            None => self.visits.add_visit(key).await?,
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.queue.push_request(self.lane, &request).await {
            self.settle();
            if let Err(undo) = self.visits.retract_visit(key).await {
                tracing::warn!(collector_id = self.id, url = key, error = %undo, "failed to take back visit");
            }
            return Err(e);
        }
        tracing::debug!(
            request_id = request.id,
            collector_id = self.id,
            url = %request.url,
            depth = request.depth,
            "request queued"
        );

        self.pump().await;
        Ok(())
    }

    /// Dispatch a followed link, logging instead of returning the outcome.
    async fn dispatch_logged(self: &Arc<Self>, request: Request) {
        let url = request.url.clone();
        match self.dispatch(request, None).await {
            Ok(()) => {}
            Err(e) if e.is_rejection() => {
                tracing::debug!(collector_id = self.id, url = %url, reason = %e, "link skipped");
            }
            Err(e) => tracing::warn!(collector_id = self.id, url = %url, error = %e, "failed to queue link"),
        }
    }

    /// Move queued requests to the pool until every worker has one.
    ///
    /// Does nothing once the pool is stopped, so the lane keeps what is left.
    async fn pump(self: &Arc<Self>) {
        let _guard = self.pump_lock.lock().await;
        while self.pool.is_running() && self.running.load(Ordering::SeqCst) < self.workers {
            let item = match self.queue.pop(self.lane).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(collector_id = self.id, lane = self.lane, error = %e, "queue pop failed");
                    break;
                }
            };
            let request = match serde_json::from_slice::<Request>(&item) {
                Ok(request) => self.attach(request),
                Err(e) => {
                    tracing::warn!(collector_id = self.id, lane = self.lane, error = %e, "dropping undecodable queue item");
                    self.settle();
                    continue;
                }
            };
            self.running.fetch_add(1, Ordering::SeqCst);
            self.pool.add_work(Arc::new(FetchTask { inner: Arc::clone(self), request }));
        }
    }

    /// Bookkeeping once a handed-out request is done, successfully or not.
    pub(crate) async fn finish(self: &Arc<Self>) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.pump().await;
        self.settle();
    }

    /// Return a request the stopped pool never ran to the lane. It stays pending.
    pub(crate) async fn park(&self, request: &Request) -> Result<(), Error> {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.queue.push_request(self.lane, request).await
    }

    /// Drop one pending request and wake waiters when none are left.
    pub(crate) fn settle(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// A crawler instance. Clones share state.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("id", &self.inner.id)
            .field("lane", &self.inner.lane)
            .field("pending", &self.inner.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Collector {
    pub fn builder(config: CrawlConfig) -> CollectorBuilder {
        CollectorBuilder { config, stores: None, rules: Vec::new(), lane: 0, tracer: None, parser: None }
    }

    /// Build a collector from `config` with the storage it names.
    pub async fn from_config(config: CrawlConfig) -> Result<Self, Error> {
        Self::builder(config).build().await
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    pub fn visits(&self) -> &Arc<dyn VisitStore> {
        &self.inner.visits
    }

    pub fn client(&self) -> &FetchClient {
        &self.inner.client
    }

    /// Queue a GET for `url`.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] when a filter or robots.txt refuses the URL,
    /// [`Error::InvalidUrl`] for unusable input and [`Error::QueueFull`] when
    /// the lane is at capacity.
    pub async fn visit(&self, url: &str) -> Result<(), Error> {
        let url = canonicalize(url)?;
        self.request(Request::get(url)).await
    }

    /// Queue a form POST of `body` to `url`.
    pub async fn post(&self, url: &str, body: impl Into<Vec<u8>>) -> Result<(), Error> {
        let url = canonicalize(url)?;
        let request = Request::new(Method::Post, url)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body);
        self.request(request).await
    }

    /// Queue a fully specified request.
    pub async fn request(&self, request: Request) -> Result<(), Error> {
        let request = self.inner.attach(request);
        self.inner.dispatch(request, None).await
    }

    /// Build and queue a request with explicit method, headers and body.
    pub async fn request_with(
        &self, method: Method, url: &str, headers: Headers, body: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        let mut request = Request::new(method, canonicalize(url)?);
        request.headers = headers;
        request.body = body;
        self.request(request).await
    }

    /// Queue `response`'s request again, skipping the revisit filter.
    pub async fn retry(&self, response: &Response) -> Result<(), Error> {
        let labels = [
            self.inner.filter.labels(Policy::Exclude).await,
            self.inner.filter.labels(Policy::Include).await,
        ]
        .concat();
        let tags: Vec<&str> = labels.iter().map(String::as_str).filter(|l| *l != REVISIT_LABEL).collect();
        let request = self.inner.attach(response.request.retry_copy());
        self.inner.dispatch(request, Some(&tags)).await
    }

    /// Wait until no request is queued or running.
    pub async fn wait(&self) {
        self.inner.pump().await;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the worker pool and wait for running requests to finish.
    ///
    /// Queued requests, including ones already handed to the pool but not yet
    /// started, stay on the lane for a later collector on the same store.
    /// [`Collector::wait`] does not return after this while any are queued.
    pub async fn shutdown(&self) {
        self.inner.pool.stop();
        self.inner.pool.join().await;
    }

    fn register(&self, key: CallbackKey, callback: Callback) {
        self.edit_callbacks(|callbacks| callbacks.push(key, callback));
    }

    /// Edit the callback registry directly, e.g. to insert at a position.
    pub fn edit_callbacks<R>(&self, f: impl FnOnce(&mut Callbacks) -> R) -> R {
        let mut callbacks = self.inner.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut callbacks)
    }

    /// Run `f` before every request is sent. `f` may abort the request.
    pub fn on_request(&self, f: impl Fn(&Request) + Send + Sync + 'static) {
        self.register((Event::Request, String::new()), Callback::Request(Arc::new(f)));
    }

    /// Run `f` once status and headers are in. Aborting the request there
    /// closes the connection without reading the body.
    pub fn on_response_headers(&self, f: impl Fn(&Request, u16, &Headers) + Send + Sync + 'static) {
        self.register((Event::ResponseHeaders, String::new()), Callback::ResponseHeaders(Arc::new(f)));
    }

    /// Run `f` for every successful (status < 400) response.
    pub fn on_response(&self, f: impl Fn(&Response) + Send + Sync + 'static) {
        self.register((Event::Response, String::new()), Callback::Response(Arc::new(f)));
    }

    /// Run `f` for every element matching `selector` in HTML responses.
    pub fn on_html(&self, selector: &str, f: impl Fn(&HtmlElement<'_>) + Send + Sync + 'static) -> Result<(), Error> {
        parse_selector(selector)?;
        self.register((Event::Html, selector.to_string()), Callback::Html(Arc::new(f)));
        Ok(())
    }

    /// Run `f` on network failures, error statuses and failed tasks.
    pub fn on_error(&self, f: impl Fn(&Request, Option<&Response>, &Error) + Send + Sync + 'static) {
        self.register((Event::Error, String::new()), Callback::Error(Arc::new(f)));
    }

    /// Run `f` after the `on_html` callbacks of a response.
    pub fn on_scraped(&self, f: impl Fn(&Response) + Send + Sync + 'static) {
        self.register((Event::Scraped, String::new()), Callback::Scraped(Arc::new(f)));
    }

    /// Resolve `href` against the crawl's URL parser.
    pub fn absolute_url(&self, base: &Url, href: &str) -> Option<Url> {
        let resolved = match &self.inner.parser {
            Some(parser) => parser.parse_ref(base, href).ok(),
            None => base.join(href).ok(),
        };
        resolved.and_then(|url| normalize(url).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).insert_header("content-type", "text/html; charset=utf-8").set_body_string(body)
    }

    fn config() -> CrawlConfig {
        CrawlConfig { ignore_robots_txt: true, workers: 2, ..Default::default() }
    }

    fn record_paths(collector: &Collector) -> Arc<StdMutex<BTreeSet<String>>> {
        let seen = Arc::new(StdMutex::new(BTreeSet::new()));
        let sink = seen.clone();
        collector.on_response(move |r| {
            sink.lock().unwrap().insert(r.request.url.path().to_string());
        });
        seen
    }

    fn follow_links(collector: &Collector) {
        collector
            .on_html("a[href]", |e| {
                if let Some(href) = e.attr("href") {
                    e.follow(href);
                }
            })
            .unwrap();
    }

    async fn wait(collector: &Collector) {
        tokio::time::timeout(Duration::from_secs(10), collector.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_depth_limit_stops_at_grandchildren() {
        let server = MockServer::start().await;
        Mock::given(path("/")).respond_with(html(r#"<a href="/a">A</a><a href="/b">B</a>"#)).mount(&server).await;
        Mock::given(path("/a")).respond_with(html(r#"<a href="/c">C</a>"#)).mount(&server).await;
        Mock::given(path("/b")).respond_with(html("<p>leaf</p>")).mount(&server).await;
        Mock::given(path("/c")).respond_with(html("<p>too deep</p>")).expect(0).mount(&server).await;

        let collector = Collector::from_config(CrawlConfig { max_depth: 1, ..config() }).await.unwrap();
        let seen = record_paths(&collector);
        follow_links(&collector);

        collector.visit(&server.uri()).await.unwrap();
        wait(&collector).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, BTreeSet::from(["/".to_string(), "/a".to_string(), "/b".to_string()]));
    }

    #[tokio::test]
    async fn test_revisit_limit_zero_rejects_second_visit() {
        let server = MockServer::start().await;
        Mock::given(path("/once")).respond_with(html("ok")).expect(1).mount(&server).await;

        let collector = Collector::from_config(CrawlConfig { max_revisits: Some(0), ..config() }).await.unwrap();
        let url = format!("{}/once", server.uri());

        collector.visit(&url).await.unwrap();
        let err = collector.visit(&url).await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::Revisited));
        wait(&collector).await;
    }

    #[tokio::test]
    async fn test_retry_bypasses_revisit_filter() {
        let server = MockServer::start().await;
        Mock::given(path("/again")).respond_with(html("ok")).expect(2).mount(&server).await;

        let collector = Collector::from_config(CrawlConfig { max_revisits: Some(0), ..config() }).await.unwrap();
        let last = Arc::new(StdMutex::new(None));
        let sink = last.clone();
        collector.on_response(move |r| {
            *sink.lock().unwrap() = Some(r.clone());
        });

        collector.visit(&format!("{}/again", server.uri())).await.unwrap();
        wait(&collector).await;

        let response = last.lock().unwrap().take().unwrap();
        collector.retry(&response).await.unwrap();
        wait(&collector).await;
        assert_eq!(collector.visits().past_visits(response.request.url.as_str()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_domain_filters() {
        let collector = Collector::from_config(CrawlConfig {
            allowed_domains: vec!["*.example.com".into()],
            disallowed_domains: vec!["private.example.com".into()],
            ..config()
        })
        .await
        .unwrap();

        let err = collector.visit("https://other.org/").await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::NoMatchingFilter));
        let err = collector.visit("https://private.example.com/").await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::ForbiddenDomain));
    }

    #[tokio::test]
    async fn test_on_request_abort_skips_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(html("ok")).expect(0).mount(&server).await;

        let collector = Collector::from_config(config()).await.unwrap();
        collector.on_request(|r| r.abort());
        let seen = record_paths(&collector);

        collector.visit(&format!("{}/skip", server.uri())).await.unwrap();
        wait(&collector).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_header_abort_skips_callbacks() {
        let server = MockServer::start().await;
        Mock::given(path("/file.zip"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("content-type", "application/zip").set_body_bytes(vec![0u8; 64]),
            )
            .mount(&server)
            .await;

        let collector = Collector::from_config(config()).await.unwrap();
        collector.on_response_headers(|request, _, headers| {
            if !headers.get("content-type").is_some_and(|ct| ct.contains("html")) {
                request.abort();
            }
        });
        let seen = record_paths(&collector);

        collector.visit(&format!("{}/file.zip", server.uri())).await.unwrap();
        wait(&collector).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_status_reaches_on_error() {
        let server = MockServer::start().await;
        Mock::given(path("/gone")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let collector = Collector::from_config(config()).await.unwrap();
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let sink = errors.clone();
        collector.on_error(move |_, response, error| {
            sink.lock().unwrap().push((response.map(|r| r.status), error.to_string()));
        });

        collector.visit(&format!("{}/gone", server.uri())).await.unwrap();
        wait(&collector).await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Some(404));
        assert!(errors[0].1.contains("404"));
    }

    #[tokio::test]
    async fn test_scraped_runs_after_html() {
        let server = MockServer::start().await;
        Mock::given(path("/p")).respond_with(html("<h1>Title</h1>")).mount(&server).await;

        let collector = Collector::from_config(config()).await.unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let (a, b, c) = (order.clone(), order.clone(), order.clone());
        collector.on_scraped(move |_| a.lock().unwrap().push("scraped".to_string()));
        collector.on_html("h1", move |e| b.lock().unwrap().push(e.text())).unwrap();
        collector.on_response(move |_| c.lock().unwrap().push("response".to_string()));

        collector.visit(&format!("{}/p", server.uri())).await.unwrap();
        wait(&collector).await;
        assert_eq!(*order.lock().unwrap(), ["response", "Title", "scraped"]);
    }

    #[tokio::test]
    async fn test_invalid_selector_rejected() {
        let collector = Collector::from_config(config()).await.unwrap();
        assert!(collector.on_html("a[[", |_| {}).is_err());
        assert!(collector.edit_callbacks(|c| c.is_empty()));
    }

    #[tokio::test]
    async fn test_insert_callback_at_front() {
        let server = MockServer::start().await;
        Mock::given(path("/")).respond_with(html("ok")).mount(&server).await;

        let collector = Collector::from_config(config()).await.unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        collector.on_response(move |_| a.lock().unwrap().push(2));
        collector
            .edit_callbacks(|c| {
                c.insert_at(
                    (Event::Response, String::new()),
                    0,
                    Callback::Response(Arc::new(move |_: &Response| b.lock().unwrap().push(1))),
                )
            })
            .unwrap();

        collector.visit(&server.uri()).await.unwrap();
        wait(&collector).await;
        assert_eq!(*order.lock().unwrap(), [1, 2]);
    }

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(html("ok")).mount(&server).await;

        let collector = Collector::from_config(config()).await.unwrap();
        let ids = Arc::new(StdMutex::new(Vec::new()));
        let sink = ids.clone();
        collector.on_request(move |r| sink.lock().unwrap().push((r.id, r.collector_id)));

        for p in ["/1", "/2", "/3"] {
            collector.visit(&format!("{}{p}", server.uri())).await.unwrap();
        }
        wait(&collector).await;

        let mut ids = ids.lock().unwrap().clone();
        ids.sort();
        assert_eq!(ids.iter().map(|(id, _)| *id).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(ids.iter().all(|(_, c)| *c == collector.id()));
    }

    #[tokio::test]
    async fn test_post_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/form"))
            .and(wiremock::matchers::body_string("q=rust"))
            .respond_with(html("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let collector = Collector::from_config(config()).await.unwrap();
        collector.post(&format!("{}/form", server.uri()), "q=rust").await.unwrap();
        wait(&collector).await;
    }

    #[tokio::test]
    async fn test_absolute_url_normalizes() {
        let collector = Collector::from_config(config()).await.unwrap();
        let base = Url::parse("https://example.com/docs/intro").unwrap();
        let url = collector.absolute_url(&base, "../Guide#part").unwrap();
        assert_eq!(url.as_str(), "https://example.com/Guide");
        assert!(collector.absolute_url(&base, "javascript:void(0)").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_visits_respect_revisit_limit() {
        let server = MockServer::start().await;
        Mock::given(path("/hot")).respond_with(html("ok")).expect(1).mount(&server).await;

        let collector = Collector::from_config(CrawlConfig { max_revisits: Some(0), ..config() }).await.unwrap();
        let url = format!("{}/hot", server.uri());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let (collector, url) = (collector.clone(), url.clone());
            handles.push(tokio::spawn(async move { collector.visit(&url).await }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(e) => assert_eq!(e.rejection(), Some(Rejection::Revisited)),
            }
        }
        assert_eq!(accepted, 1);
        wait(&collector).await;
        assert_eq!(collector.visits().past_visits(&url).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_count_visit() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(html("ok").set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        Mock::given(path("/waiting")).respond_with(html("ok")).mount(&server).await;
        Mock::given(path("/later")).respond_with(html("ok")).expect(1).mount(&server).await;

        let collector = Collector::from_config(CrawlConfig {
            max_revisits: Some(0),
            workers: 1,
            queue_capacity: 1,
            ..config()
        })
        .await
        .unwrap();
        let later = format!("{}/later", server.uri());

        collector.visit(&format!("{}/slow", server.uri())).await.unwrap();
        collector.visit(&format!("{}/waiting", server.uri())).await.unwrap();
        let err = collector.visit(&later).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull { .. }));
        assert_eq!(collector.visits().past_visits(&later).await.unwrap(), 0);

        wait(&collector).await;
        collector.visit(&later).await.unwrap();
        wait(&collector).await;
    }

    #[tokio::test]
    async fn test_shutdown_keeps_queued_requests() {
        use wayfarer_core::storage::{QueueStore, SledStore};

        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(html("ok").set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(html("ok")).mount(&server).await;

        let queue: Arc<dyn QueueStore> = Arc::new(SledStore::temporary().unwrap());
        let stores = || Stores {
            visits: Arc::new(wayfarer_core::MemoryVisits::new()),
            queue: Arc::clone(&queue),
            cache: None,
        };
        let single = CrawlConfig { workers: 1, ..config() };

        let first = Collector::builder(single.clone()).stores(stores()).build().await.unwrap();
        let started = Arc::new(Notify::new());
        let signal = started.clone();
        first.on_request(move |_| signal.notify_one());

        first.visit(&format!("{}/slow", server.uri())).await.unwrap();
        for p in ["/q1", "/q2", "/q3"] {
            first.visit(&format!("{}{p}", server.uri())).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), started.notified()).await.unwrap();

        first.shutdown().await;
        assert_eq!(queue.len(0).await.unwrap(), 3);

        // A stopped collector queues new work without running it.
        first.visit(&format!("{}/q4", server.uri())).await.unwrap();
        assert_eq!(queue.len(0).await.unwrap(), 4);

        let second = Collector::builder(single).stores(stores()).build().await.unwrap();
        let seen = record_paths(&second);
        wait(&second).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, ["/q1", "/q2", "/q3", "/q4"].into_iter().map(String::from).collect::<BTreeSet<_>>());
        assert_eq!(queue.len(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wait_with_nothing_queued() {
        let collector = Collector::from_config(config()).await.unwrap();
        wait(&collector).await;
    }
}
