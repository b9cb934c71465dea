//! In-process backends guarded by tokio read/write locks.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ByteStore, QueueStore};
use crate::Error;

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, Error> {
        Ok(self.entries.read().await.len())
    }
}

/// In-memory lane queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    lanes: RwLock<HashMap<u64, VecDeque<Vec<u8>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn push(&self, lane: u64, item: Vec<u8>) -> Result<(), Error> {
        self.lanes.write().await.entry(lane).or_default().push_back(item);
        Ok(())
    }

    async fn pop(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        let mut lanes = self.lanes.write().await;
        let item = lanes.get_mut(&lane).and_then(VecDeque::pop_front);
        if lanes.get(&lane).is_some_and(VecDeque::is_empty) {
            lanes.remove(&lane);
        }
        Ok(item)
    }

    async fn peek(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.lanes.read().await.get(&lane).and_then(|q| q.front().cloned()))
    }

    async fn len(&self, lane: u64) -> Result<usize, Error> {
        Ok(self.lanes.read().await.get(&lane).map_or(0, VecDeque::len))
    }

    async fn clear(&self, lane: u64) -> Result<(), Error> {
        self.lanes.write().await.remove(&lane);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_put_fetch_remove() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert!(store.has("k").await.unwrap());
        assert_eq!(store.fetch("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len().await.unwrap(), 1);

        store.remove("k").await.unwrap();
        assert_eq!(store.fetch("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_rejects_blank_key() {
        let store = MemoryStore::new();
        assert!(matches!(store.put("", vec![]).await, Err(Error::BlankPath)));
    }

    #[tokio::test]
    async fn test_queue_fifo_per_lane() {
        let queue = MemoryQueue::new();
        for i in 0..5u8 {
            queue.push(1, vec![i]).await.unwrap();
            queue.push(2, vec![100 + i]).await.unwrap();
        }
        assert_eq!(queue.peek(1).await.unwrap(), Some(vec![0]));
        for i in 0..5u8 {
            assert_eq!(queue.pop(1).await.unwrap(), Some(vec![i]));
        }
        assert_eq!(queue.pop(1).await.unwrap(), None);
        assert_eq!(queue.len(2).await.unwrap(), 5);

        queue.clear(2).await.unwrap();
        assert_eq!(queue.len(2).await.unwrap(), 0);
    }
}
