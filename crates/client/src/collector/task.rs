//! The worker-pool task that fetches one request and runs its callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use wayfarer_core::{Error, Request, Response, Task};

use super::Inner;
use super::callbacks::{self, Callback, Event};
use crate::extract;

pub(crate) struct FetchTask {
    pub(crate) inner: Arc<Inner>,
    pub(crate) request: Request,
}

#[async_trait]
impl Task for FetchTask {
    async fn execute(&self) -> Result<(), Error> {
        let result = self.process().await;
        if result.is_ok() {
            self.inner.finish().await;
        }
        result
    }

    async fn on_failure(&self, error: Error) {
        if matches!(error, Error::PoolStopped) {
            match self.inner.park(&self.request).await {
                Ok(()) => {
                    tracing::debug!(request_id = self.request.id, url = %self.request.url, "request returned to queue");
                    return;
                }
                Err(e) => {
                    tracing::warn!(request_id = self.request.id, url = %self.request.url, error = %e, "request dropped");
                    self.report(None, &e);
                    self.inner.settle();
                    return;
                }
            }
        }
        tracing::warn!(
            request_id = self.request.id,
            collector_id = self.request.collector_id,
            url = %self.request.url,
            error = %error,
            "request failed"
        );
        self.report(None, &error);
        self.inner.finish().await;
    }
}

impl FetchTask {
    async fn process(&self) -> Result<(), Error> {
        let request = &self.request;

        for cb in self.inner.callbacks_for(Event::Request) {
            if let Callback::Request(f) = cb {
                f(request);
            }
        }
        if request.is_aborted() {
            tracing::debug!(request_id = request.id, url = %request.url, "request aborted by callback");
            return Ok(());
        }

        let header_callbacks: Vec<_> = self
            .inner
            .callbacks_for(Event::ResponseHeaders)
            .into_iter()
            .filter_map(|cb| match cb {
                Callback::ResponseHeaders(f) => Some(f),
                _ => None,
            })
            .collect();
        let check = move |request: &Request, status: u16, headers: &wayfarer_core::Headers| {
            for f in &header_callbacks {
                f(request, status, headers);
            }
            !request.is_aborted()
        };

        let response = match self.inner.client.fetch(request, Some(&check)).await {
            Ok(response) => response,
            Err(e) if e.is_abort() => {
                tracing::debug!(request_id = request.id, url = %request.url, "transfer aborted after headers");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            request_id = request.id,
            collector_id = request.collector_id,
            url = %request.url,
            status = response.status,
            cached = response.cached,
            "response received"
        );

        if !response.is_success() {
            self.report(Some(&response), &Error::HttpStatus(response.status));
            return Ok(());
        }

        for cb in self.inner.callbacks_for(Event::Response) {
            if let Callback::Response(f) = cb {
                f(&response);
            }
        }

        if response.is_html() {
            let handlers = self.inner.html_callbacks();
            let follows = extract::scrape(&response, &handlers);
            for child in follows {
                self.inner.dispatch_logged(child).await;
            }
        }

        for cb in self.inner.callbacks_for(Event::Scraped) {
            if let Callback::Scraped(f) = cb {
                f(&response);
            }
        }
        Ok(())
    }

    fn report(&self, response: Option<&Response>, error: &Error) {
        for cb in self.inner.callbacks_for(Event::Error) {
            if let Callback::Error(f) = cb {
                f(&self.request, response, error);
            }
        }
    }
}

impl std::fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask").field("request", &self.request.url.as_str()).finish_non_exhaustive()
    }
}

// Registry reads take the lock briefly and return owned snapshots so no lock
// is held while user callbacks run.
impl Inner {
    fn callbacks_for(&self, event: Event) -> Vec<Callback> {
        callbacks::plain(&self.callbacks.read().unwrap_or_else(std::sync::PoisonError::into_inner), event)
    }

    fn html_callbacks(&self) -> Vec<(String, Vec<extract::HtmlCallback>)> {
        callbacks::html(&self.callbacks.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }
}
