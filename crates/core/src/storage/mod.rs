//! Byte storage backends shared by the response cache, the visit store and
//! the dispatch queue.
//!
//! Every backend exposes one or more of three shapes:
//!
//! - [`ByteStore`]: key/value blobs (cache-shaped)
//! - [`QueueStore`]: per-lane FIFO blobs (queue-shaped)
//! - [`VisitStore`](crate::visits::VisitStore): per-key counters (visit-shaped)
//!
//! Backends do their own locking; callers only go through these traits.

pub mod embedded;
pub mod fs;
pub mod memory;
pub mod pool;
pub mod sqlite;

use async_trait::async_trait;

use crate::Error;

pub use embedded::SledStore;
pub use fs::FsStore;
pub use memory::{MemoryQueue, MemoryStore};
pub use pool::ConnectionPool;
pub use sqlite::SqliteStore;

/// Connection pools for the file-backed stores, shared by every store a
/// crawl opens.
#[derive(Debug, Default)]
pub struct StoragePools {
    pub sqlite: ConnectionPool<tokio_rusqlite::Connection>,
    pub sled: ConnectionPool<sled::Db>,
}

/// Key/value blob storage.
#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    async fn has(&self, key: &str) -> Result<bool, Error>;

    async fn remove(&self, key: &str) -> Result<(), Error>;

    async fn clear(&self) -> Result<(), Error>;

    async fn len(&self) -> Result<usize, Error>;
}

/// FIFO blob storage partitioned into lanes.
///
/// Order is strict within a lane and unspecified across lanes. `pop` and
/// `peek` on an empty lane return `Ok(None)`; waiting is the caller's job.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push(&self, lane: u64, item: Vec<u8>) -> Result<(), Error>;

    async fn pop(&self, lane: u64) -> Result<Option<Vec<u8>>, Error>;

    async fn peek(&self, lane: u64) -> Result<Option<Vec<u8>>, Error>;

    async fn len(&self, lane: u64) -> Result<usize, Error>;

    async fn clear(&self, lane: u64) -> Result<(), Error>;
}
