//! Callback kinds a collector fans out to.

use std::fmt;
use std::sync::Arc;

use wayfarer_core::{CallbackList, Error, Headers, Request, Response};

use crate::extract::HtmlCallback;

/// Lifecycle point a callback is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Request,
    ResponseHeaders,
    Response,
    Html,
    Error,
    Scraped,
}

/// Registry key: the event plus its argument (the CSS selector for
/// [`Event::Html`], empty otherwise).
pub type CallbackKey = (Event, String);

pub type Callbacks = CallbackList<CallbackKey, Callback>;

/// A registered callback.
#[derive(Clone)]
pub enum Callback {
    /// Runs before the request is sent; may call [`Request::abort`].
    Request(Arc<dyn Fn(&Request) + Send + Sync>),
    /// Runs once status and headers arrive; aborting the request skips the body.
    ResponseHeaders(Arc<dyn Fn(&Request, u16, &Headers) + Send + Sync>),
    Response(Arc<dyn Fn(&Response) + Send + Sync>),
    Html(HtmlCallback),
    /// Network failures, error statuses and task failures. The response is
    /// present for error statuses.
    Error(Arc<dyn Fn(&Request, Option<&Response>, &Error) + Send + Sync>),
    /// Runs after all `Html` callbacks of a response.
    Scraped(Arc<dyn Fn(&Response) + Send + Sync>),
}

impl Callback {
    pub fn event(&self) -> Event {
        match self {
            Callback::Request(_) => Event::Request,
            Callback::ResponseHeaders(_) => Event::ResponseHeaders,
            Callback::Response(_) => Event::Response,
            Callback::Html(_) => Event::Html,
            Callback::Error(_) => Event::Error,
            Callback::Scraped(_) => Event::Scraped,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{:?}", self.event())
    }
}

/// Callbacks registered for a plain (argument-less) event.
pub(crate) fn plain(callbacks: &Callbacks, event: Event) -> Vec<Callback> {
    callbacks.get(&(event, String::new())).to_vec()
}

/// `Html` callbacks grouped by selector, in registration order.
pub(crate) fn html(callbacks: &Callbacks) -> Vec<(String, Vec<HtmlCallback>)> {
    callbacks
        .iter()
        .filter(|((event, _), _)| *event == Event::Html)
        .map(|((_, selector), list)| {
            let list = list
                .iter()
                .filter_map(|cb| match cb {
                    Callback::Html(f) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            (selector.clone(), list)
        })
        .collect()
}
