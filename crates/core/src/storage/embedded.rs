//! Embedded ordered key/value backend built on sled.
//!
//! One database holds four trees: `cache` for blobs, `visits` for counters,
//! `queue` for lane items keyed by `lane ++ sequence` (both big-endian), so a
//! prefix scan over a lane yields its items in push order, and `lanes` for
//! per-lane item counts kept in step with `queue` by transactions.
//!
//! Calls that may retry or touch several trees run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, IVec, Transactional, Tree};

use super::{ByteStore, ConnectionPool, QueueStore};
use crate::Error;
use crate::visits::VisitStore;

/// sled-backed store implementing all three storage shapes.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Arc<Db>,
    cache: Tree,
    visits: Tree,
    queue: Tree,
    lanes: Tree,
}

impl SledStore {
    /// Open the database at `path` through `pool`, sharing it with other
    /// stores opened on the same path.
    pub async fn open(pool: &ConnectionPool<Db>, path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = pool.acquire(path, |p| async move { Ok(sled::open(p)?) }).await?;
        Self::from_db(db)
    }

    /// A throwaway database removed on drop.
    pub fn temporary() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(Arc::new(db))
    }

    fn from_db(db: Arc<Db>) -> Result<Self, Error> {
        Ok(Self {
            cache: db.open_tree("cache")?,
            visits: db.open_tree("visits")?,
            queue: db.open_tree("queue")?,
            lanes: db.open_tree("lanes")?,
            db,
        })
    }

    pub async fn flush(&self) -> Result<(), Error> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Remove one queue entry and decrement its lane count, atomically.
    ///
    /// Returns `None` when a concurrent caller removed the entry first.
    fn take(&self, lane: u64, key: &IVec) -> Result<Option<IVec>, Error> {
        (&self.queue, &self.lanes)
            .transaction(|(queue, lanes)| {
                let item = queue.remove(key.clone())?;
                if item.is_some() {
                    adjust_lane(lanes, lane, -1)?;
                }
                Ok(item)
            })
            .map_err(transaction_error)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn decode_count(bytes: &[u8]) -> u64 {
    bytes.try_into().map(u64::from_be_bytes).unwrap_or(0)
}

fn queue_key(lane: u64, seq: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&lane.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn adjust_lane(lanes: &TransactionalTree, lane: u64, delta: i64) -> Result<(), ConflictableTransactionError<()>> {
    let key = lane.to_be_bytes();
    let count = lanes.get(&key[..])?.map(|v| decode_count(&v)).unwrap_or(0);
    let next = count.saturating_add_signed(delta);
    if next == 0 {
        lanes.remove(&key[..])?;
    } else {
        lanes.insert(&key[..], &next.to_be_bytes()[..])?;
    }
    Ok(())
}

fn transaction_error(e: TransactionError<()>) -> Error {
    match e {
        TransactionError::Storage(e) => Error::Sled(e),
        TransactionError::Abort(()) => Error::Io(std::io::Error::other("sled transaction aborted")),
    }
}

#[async_trait]
impl ByteStore for SledStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        self.cache.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.cache.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(self.cache.contains_key(key.as_bytes())?)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.cache.remove(key.as_bytes())?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let cache = self.cache.clone();
        blocking(move || Ok(cache.clear()?)).await
    }

    async fn len(&self) -> Result<usize, Error> {
        Ok(self.cache.len())
    }
}

#[async_trait]
impl VisitStore for SledStore {
    async fn add_visit(&self, key: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let (visits, key) = (self.visits.clone(), key.to_string());
        blocking(move || {
            visits.update_and_fetch(key.as_bytes(), |old| {
                let next = old.map(decode_count).unwrap_or(0) + 1;
                Some(next.to_be_bytes().to_vec())
            })?;
            Ok(())
        })
        .await
    }

    async fn add_visit_within(&self, key: &str, max: u64) -> Result<bool, Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let (visits, key) = (self.visits.clone(), key.to_string());
        blocking(move || {
            let previous = visits.fetch_and_update(key.as_bytes(), |old| {
                let count = old.map(decode_count).unwrap_or(0);
                let next = if count > max { count } else { count + 1 };
                Some(next.to_be_bytes().to_vec())
            })?;
            Ok(previous.map(|v| decode_count(&v)).unwrap_or(0) <= max)
        })
        .await
    }

    async fn retract_visit(&self, key: &str) -> Result<(), Error> {
        let (visits, key) = (self.visits.clone(), key.to_string());
        blocking(move || {
            visits.update_and_fetch(key.as_bytes(), |old| {
                let next = old.map(decode_count).unwrap_or(0).saturating_sub(1);
                (next > 0).then(|| next.to_be_bytes().to_vec())
            })?;
            Ok(())
        })
        .await
    }

    async fn past_visits(&self, key: &str) -> Result<u64, Error> {
        Ok(self.visits.get(key.as_bytes())?.map(|v| decode_count(&v)).unwrap_or(0))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.visits.remove(key.as_bytes())?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let visits = self.visits.clone();
        blocking(move || Ok(visits.clear()?)).await
    }
}

#[async_trait]
impl QueueStore for SledStore {
    async fn push(&self, lane: u64, item: Vec<u8>) -> Result<(), Error> {
        let store = self.clone();
        blocking(move || {
            let key = queue_key(lane, store.db.generate_id()?);
            (&store.queue, &store.lanes)
                .transaction(|(queue, lanes)| {
                    queue.insert(&key[..], item.as_slice())?;
                    adjust_lane(lanes, lane, 1)
                })
                .map_err(transaction_error)
        })
        .await
    }

    async fn pop(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        let store = self.clone();
        blocking(move || {
            loop {
                let Some(first) = store.queue.scan_prefix(lane.to_be_bytes()).next() else {
                    return Ok(None);
                };
                let (key, _) = first?;
                // A concurrent pop may have taken the same head; retry on the next one.
                if let Some(item) = store.take(lane, &key)? {
                    return Ok(Some(item.to_vec()));
                }
            }
        })
        .await
    }

    async fn peek(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        match self.queue.scan_prefix(lane.to_be_bytes()).next() {
            Some(entry) => Ok(Some(entry?.1.to_vec())),
            None => Ok(None),
        }
    }

    async fn len(&self, lane: u64) -> Result<usize, Error> {
        let count = self.lanes.get(lane.to_be_bytes())?.map(|v| decode_count(&v)).unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn clear(&self, lane: u64) -> Result<(), Error> {
        let store = self.clone();
        blocking(move || {
            for entry in store.queue.scan_prefix(lane.to_be_bytes()) {
                let (key, _) = entry?;
                store.take(lane, &key)?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_byte_store() {
        let store = SledStore::temporary().unwrap();
        ByteStore::put(&store, "k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.fetch("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.has("k").await.unwrap());
        assert_eq!(ByteStore::len(&store).await.unwrap(), 1);
        ByteStore::clear(&store).await.unwrap();
        assert!(!store.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_visit_counter() {
        let store = SledStore::temporary().unwrap();
        for _ in 0..3 {
            store.add_visit("https://example.com/").await.unwrap();
        }
        assert_eq!(store.past_visits("https://example.com/").await.unwrap(), 3);
        VisitStore::remove(&store, "https://example.com/").await.unwrap();
        assert_eq!(store.past_visits("https://example.com/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_lanes_are_independent() {
        let store = SledStore::temporary().unwrap();
        store.push(7, b"a".to_vec()).await.unwrap();
        store.push(8, b"x".to_vec()).await.unwrap();
        store.push(7, b"b".to_vec()).await.unwrap();

        assert_eq!(QueueStore::len(&store, 7).await.unwrap(), 2);
        assert_eq!(store.peek(7).await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.pop(7).await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.pop(7).await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.pop(7).await.unwrap(), None);
        assert_eq!(store.pop(8).await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(QueueStore::len(&store, 7).await.unwrap(), 0);
        assert_eq!(QueueStore::len(&store, 8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lane_count_tracks_push_pop_clear() {
        let store = SledStore::temporary().unwrap();
        for i in 0..5u8 {
            store.push(3, vec![i]).await.unwrap();
        }
        store.pop(3).await.unwrap();
        assert_eq!(QueueStore::len(&store, 3).await.unwrap(), 4);
        QueueStore::clear(&store, 3).await.unwrap();
        assert_eq!(QueueStore::len(&store, 3).await.unwrap(), 0);
        assert_eq!(store.pop(3).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_visit_within_is_atomic() {
        let store = SledStore::temporary().unwrap();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.add_visit_within("https://example.com/", 1).await.unwrap() }));
        }
        let mut admitted = 0;
        for handle in handles {
            admitted += usize::from(handle.await.unwrap());
        }
        assert_eq!(admitted, 2);
        store.retract_visit("https://example.com/").await.unwrap();
        assert_eq!(store.past_visits("https://example.com/").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pool_shares_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(2);
        let path = dir.path().join("state");

        let a = SledStore::open(&pool, &path).await.unwrap();
        let b = SledStore::open(&pool, &path).await.unwrap();
        a.add_visit("example.com").await.unwrap();
        assert_eq!(b.past_visits("example.com").await.unwrap(), 1);
        assert_eq!(pool.open_count().await, 1);
    }
}
