//! Network side of wayfarer.
//!
//! This crate provides the HTTP fetch client (per-domain limits, response
//! cache, header checks), robots.txt handling, HTML element selection and the
//! [`Collector`] that ties them to the core filter, queue and worker pool.

pub mod collector;
pub mod extract;
pub mod fetch;

pub use collector::{Callback, Collector, CollectorBuilder, Event};
pub use extract::{HtmlCallback, HtmlElement};
pub use fetch::{DomainRule, FetchClient, FetchConfig, HeaderCheck, Limits, RobotsCache, canonicalize};
