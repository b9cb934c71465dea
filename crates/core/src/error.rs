//! Unified error types for wayfarer.
//!
//! Policy rejections, configuration mistakes, runtime I/O failures and flow
//! signals (aborts, full queues) all travel through [`Error`]; callers inspect
//! the variant to decide whether an outcome is a failure or expected filtering.

use std::fmt;

use tokio_rusqlite::rusqlite;

/// Why a request was refused before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Rejection {
    ForbiddenDomain,
    ForbiddenUrl,
    NoMatchingFilter,
    MaxDepth,
    Revisited,
    UrlLength,
    RobotsDisallowed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::ForbiddenDomain => "FORBIDDEN_DOMAIN",
            Rejection::ForbiddenUrl => "FORBIDDEN_URL",
            Rejection::NoMatchingFilter => "NO_MATCHING_FILTER",
            Rejection::MaxDepth => "MAX_DEPTH",
            Rejection::Revisited => "ALREADY_VISITED",
            Rejection::UrlLength => "URL_LENGTH",
            Rejection::RobotsDisallowed => "ROBOTS_DISALLOWED",
        };
        f.write_str(s)
    }
}

/// Unified error type for the crawler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A filter, depth limit, revisit limit or robots.txt refused the request.
    #[error("{reason}: {url}")]
    Rejected { reason: Rejection, url: String },

    /// A storage-backed component was built without storage.
    #[error("CONFIG_ERROR: missing storage")]
    MissingStorage,

    /// The response cache was built without an expiration strategy.
    #[error("CONFIG_ERROR: missing expiration handler")]
    MissingExpiration,

    /// A storage path or key was empty.
    #[error("CONFIG_ERROR: blank path or key")]
    BlankPath,

    /// One or more filter patterns failed to compile.
    #[error("CONFIG_ERROR: invalid patterns: {}", .0.join("; "))]
    InvalidPatterns(Vec<String>),

    /// A composite engine was built from an empty engine list.
    #[error("CONFIG_ERROR: no filter engine given")]
    NoEngine,

    /// The connection pool already holds its maximum number of handles.
    #[error("CONFIG_ERROR: storage connection limit of {0} exceeded")]
    ConnectionLimit(usize),

    /// An expiration strategy was configured with a non-positive duration or a past date.
    #[error("CONFIG_ERROR: invalid expiration: {0}")]
    InvalidExpiration(String),

    /// Any other invalid construction argument.
    #[error("CONFIG_ERROR: {0}")]
    InvalidConfig(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Embedded key/value store failure.
    #[error("STORAGE_ERROR: {0}")]
    Sled(#[from] sled::Error),

    /// Filesystem failure.
    #[error("STORAGE_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding a stored record failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network-level failure.
    #[error("HTTP_ERROR: {0}")]
    Http(String),

    /// The server answered with an error status.
    #[error("HTTP_STATUS: {0}")]
    HttpStatus(u16),

    /// The header check callback vetoed the body transfer.
    #[error("ABORTED_AFTER_HEADERS: {0}")]
    AbortedAfterHeaders(String),

    /// A request callback aborted the request before it was sent.
    #[error("REQUEST_ABORTED: {0}")]
    RequestAborted(String),

    /// A bounded queue is at capacity.
    #[error("QUEUE_FULL: lane {lane} holds {max} items")]
    QueueFull { lane: u64, max: usize },

    /// The worker pool's task channel stayed full for the whole submit wait.
    #[error("POOL_SATURATED: {capacity} tasks pending")]
    PoolSaturated { capacity: usize },

    /// The worker pool is no longer accepting tasks.
    #[error("POOL_STOPPED")]
    PoolStopped,

    /// A task panicked while executing.
    #[error("TASK_PANICKED: {0}")]
    TaskPanicked(String),
}

impl Error {
    /// Build a rejection for the given URL.
    pub fn rejected(reason: Rejection, url: impl Into<String>) -> Self {
        Error::Rejected { reason, url: url.into() }
    }

    /// Policy rejections are expected outcomes, not failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }

    /// The rejection reason, if this is a policy rejection.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Error::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Header vetoes and request aborts are normal control flow.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::AbortedAfterHeaders(_) | Error::RequestAborted(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
