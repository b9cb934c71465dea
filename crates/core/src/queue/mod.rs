//! Bounded FIFO dispatch queue over a lane-partitioned [`QueueStore`].
//!
//! The queue holds requests that passed the filter but have not yet been
//! handed to the [`WorkerPool`]. Pushing never blocks and an empty lane pops
//! `None`.

pub mod pool;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::Error;
use crate::model::Request;
use crate::storage::QueueStore;

pub use pool::{Task, WorkerPool};

/// Per-lane bounded FIFO.
pub struct DispatchQueue {
    store: Arc<dyn QueueStore>,
    max_len: usize,
    /// Serializes the length check with the push.
    push_lock: Mutex<()>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue").field("max_len", &self.max_len).finish_non_exhaustive()
    }
}

impl DispatchQueue {
    pub fn new(store: Arc<dyn QueueStore>, max_len: usize) -> Result<Self, Error> {
        if max_len == 0 {
            return Err(Error::InvalidConfig("queue capacity must be at least 1".into()));
        }
        Ok(Self { store, max_len, push_lock: Mutex::new(()) })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append raw bytes to `lane`.
    ///
    /// # Errors
    ///
    /// [`Error::QueueFull`] when the lane already holds `max_len` items.
    pub async fn push(&self, lane: u64, item: Vec<u8>) -> Result<(), Error> {
        let _guard = self.push_lock.lock().await;
        if self.store.len(lane).await? >= self.max_len {
            return Err(Error::QueueFull { lane, max: self.max_len });
        }
        self.store.push(lane, item).await
    }

    pub async fn push_request(&self, lane: u64, request: &Request) -> Result<(), Error> {
        self.push(lane, serde_json::to_vec(request)?).await
    }

    pub async fn pop(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        self.store.pop(lane).await
    }

    pub async fn pop_request(&self, lane: u64) -> Result<Option<Request>, Error> {
        match self.store.pop(lane).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn peek(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        self.store.peek(lane).await
    }

    pub async fn len(&self, lane: u64) -> Result<usize, Error> {
        self.store.len(lane).await
    }

    pub async fn is_empty(&self, lane: u64) -> Result<bool, Error> {
        Ok(self.len(lane).await? == 0)
    }

    /// Drop every item in each of `lanes`.
    pub async fn clear(&self, lanes: &[u64]) -> Result<(), Error> {
        for lane in lanes {
            self.store.clear(*lane).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryQueue, SledStore, SqliteStore};
    use url::Url;

    async fn fifo_law(queue: &DispatchQueue) {
        for i in 0..10u8 {
            queue.push(1, vec![i]).await.unwrap();
            queue.push(2, vec![100 + i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(queue.pop(1).await.unwrap(), Some(vec![i]));
        }
        assert_eq!(queue.pop(1).await.unwrap(), None);
        assert_eq!(queue.len(2).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_fifo_memory() {
        fifo_law(&DispatchQueue::new(Arc::new(MemoryQueue::new()), 100).unwrap()).await;
    }

    #[tokio::test]
    async fn test_fifo_sled() {
        fifo_law(&DispatchQueue::new(Arc::new(SledStore::temporary().unwrap()), 100).unwrap()).await;
    }

    #[tokio::test]
    async fn test_fifo_sqlite() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        fifo_law(&DispatchQueue::new(Arc::new(store), 100).unwrap()).await;
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = DispatchQueue::new(Arc::new(MemoryQueue::new()), 2).unwrap();
        queue.push(0, b"a".to_vec()).await.unwrap();
        queue.push(0, b"b".to_vec()).await.unwrap();
        let err = queue.push(0, b"c".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull { lane: 0, max: 2 }));

        // Other lanes have their own capacity.
        queue.push(1, b"x".to_vec()).await.unwrap();

        queue.pop(0).await.unwrap();
        queue.push(0, b"c".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_round_trip_and_clear() {
        let queue = DispatchQueue::new(Arc::new(MemoryQueue::new()), 10).unwrap();
        let request = Request::get(Url::parse("https://example.com/a").unwrap()).with_depth(3);
        request.ctx.put("origin", "seed");
        queue.push_request(5, &request).await.unwrap();
        queue.push(6, b"raw".to_vec()).await.unwrap();

        assert!(queue.peek(5).await.unwrap().is_some());
        let popped = queue.pop_request(5).await.unwrap().unwrap();
        assert_eq!(popped.url, request.url);
        assert_eq!(popped.depth, 3);
        assert_eq!(popped.ctx.get("origin").as_deref(), Some("seed"));
        assert!(queue.pop_request(5).await.unwrap().is_none());

        queue.clear(&[5, 6]).await.unwrap();
        assert!(queue.is_empty(6).await.unwrap());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(DispatchQueue::new(Arc::new(MemoryQueue::new()), 0).is_err());
    }
}
