//! Value objects flowing through the crawl pipeline.
//!
//! A [`Request`] is created by the collector, evaluated by filters, sent by the
//! fetch client and handed to callbacks; the [`Response`] built from it is what
//! the cache stores and replays.

mod headers;
mod hooks;
mod request;
mod response;

pub use headers::Headers;
pub use hooks::{Tracer, UrlParser, WhatwgParser};
pub use request::{Context, Method, Request};
pub use response::Response;
