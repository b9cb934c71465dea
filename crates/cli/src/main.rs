//! wayfarer command-line crawler.
//!
//! Crawls from the given seeds and writes one JSON object per fetched page to
//! stdout. Logging goes to stderr so the output stays machine-readable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use wayfarer_client::Collector;
use wayfarer_core::{CrawlConfig, Response};

mod cli;

use cli::Cli;

/// One line of output.
#[derive(Debug, Serialize)]
struct PageRecord<'a> {
    url: &'a str,
    status: u16,
    depth: u32,
    bytes: usize,
    cached: bool,
    content_type: Option<&'a str>,
    title: Option<String>,
}

impl<'a> PageRecord<'a> {
    fn new(response: &'a Response, title: Option<String>) -> Self {
        Self {
            url: response.request.url.as_str(),
            status: response.status,
            depth: response.request.depth,
            bytes: response.body.len(),
            cached: response.cached,
            content_type: response.content_type(),
            title,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = CrawlConfig::load()?;
    cli.apply(&mut config);
    config.validate()?;

    let collector = Collector::from_config(config).await?;

    // Titles are keyed by request id; the request context is shared with
    // followed links and would leak a parent's title into its children.
    let titles: Arc<Mutex<HashMap<u64, String>>> = Arc::default();
    let sink = Arc::clone(&titles);
    collector.on_html("title", move |e| {
        sink.lock().unwrap_or_else(PoisonError::into_inner).entry(e.request().id).or_insert_with(|| e.text());
    })?;
    if !cli.no_follow {
        collector.on_html("a[href]", |e| {
            if let Some(href) = e.attr("href") {
                e.follow(href);
            }
        })?;
    }
    collector.on_scraped(move |response| {
        let title = titles.lock().unwrap_or_else(PoisonError::into_inner).remove(&response.request.id);
        match serde_json::to_string(&PageRecord::new(response, title)) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(url = %response.request.url, error = %e, "failed to encode page record"),
        }
    });
    collector.on_error(|request, response, error| {
        tracing::warn!(
            request_id = request.id,
            url = %request.url,
            status = ?response.map(|r| r.status),
            error = %error,
            "fetch failed"
        );
    });

    tracing::info!(seeds = cli.seeds.len(), collector_id = collector.id(), "crawl started");
    for seed in &cli.seeds {
        match collector.visit(seed).await {
            Ok(()) => {}
            Err(e) if e.is_rejection() => tracing::warn!(seed = seed.as_str(), reason = %e, "seed skipped"),
            Err(e) => return Err(e.into()),
        }
    }

    collector.wait().await;
    collector.shutdown().await;
    tracing::info!("crawl finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_client::canonicalize;
    use wayfarer_core::{Headers, Request};

    #[test]
    fn test_page_record_uses_given_title() {
        let parent = Request::get(canonicalize("https://example.com/").unwrap());
        parent.ctx.put("title", "Parent");
        let child = parent.child(canonicalize("https://example.com/child").unwrap());
        let headers: Headers = [("content-type", "text/html")].into_iter().collect();
        let response = Response::new(child, 200, headers, b"<p>no title</p>".to_vec());

        let record = PageRecord::new(&response, None);
        assert_eq!(record.title, None);
        assert_eq!(record.depth, 1);
        let line = serde_json::to_string(&PageRecord::new(&response, Some("Child".into()))).unwrap();
        assert!(line.contains(r#""title":"Child""#));
        assert!(line.contains(r#""url":"https://example.com/child""#));
    }
}
