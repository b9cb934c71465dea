//! Core types and request-lifecycle machinery for wayfarer.
//!
//! This crate provides:
//! - Request/response model and unified error types
//! - Filter engines and the include/exclude policy aggregator
//! - Visit counters, response cache and expiration strategies
//! - Storage backends (memory, filesystem, sled, SQLite) with a shared connection pool
//! - Dispatch queue and worker pool
//! - Layered configuration

pub mod cache;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod queue;
pub mod storage;
pub mod visits;

pub use cache::ResponseCache;
pub use callbacks::CallbackList;
pub use config::{ConfigError, CrawlConfig};
pub use error::{Error, Rejection};
pub use filter::{Filter, Policy, Scope};
pub use model::{Context, Headers, Method, Request, Response};
pub use queue::{DispatchQueue, Task, WorkerPool};
pub use visits::{MemoryVisits, VisitStore};
