//! Visit counters backing the revisit filter.
//!
//! Keys are normalized URLs or hostnames depending on which filter scope
//! reads them. A counter only grows until it is removed or the store cleared.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;

/// Per-key dispatch counters.
#[async_trait]
pub trait VisitStore: Send + Sync {
    /// Increment the counter for `key`, creating it at 1 if absent.
    async fn add_visit(&self, key: &str) -> Result<(), Error>;

    /// Increment the counter for `key` only while it is at most `max`.
    ///
    /// Returns whether the visit was recorded. The check and the increment
    /// are one step, so concurrent callers cannot both pass the last slot.
    async fn add_visit_within(&self, key: &str, max: u64) -> Result<bool, Error>;

    /// Take back one visit of `key`, dropping the counter when it reaches 0.
    async fn retract_visit(&self, key: &str) -> Result<(), Error>;

    /// Number of recorded visits, 0 for unknown keys.
    async fn past_visits(&self, key: &str) -> Result<u64, Error>;

    async fn remove(&self, key: &str) -> Result<(), Error>;

    async fn clear(&self) -> Result<(), Error>;
}

/// In-memory visit counters.
#[derive(Debug, Default)]
pub struct MemoryVisits {
    counts: RwLock<HashMap<String, u64>>,
}

impl MemoryVisits {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitStore for MemoryVisits {
    async fn add_visit(&self, key: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        *self.counts.write().await.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn add_visit_within(&self, key: &str, max: u64) -> Result<bool, Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let mut counts = self.counts.write().await;
        let count = counts.entry(key.to_string()).or_insert(0);
        if *count > max {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    async fn retract_visit(&self, key: &str) -> Result<(), Error> {
        let mut counts = self.counts.write().await;
        if let Some(count) = counts.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(key);
            }
        }
        Ok(())
    }

    async fn past_visits(&self, key: &str) -> Result<u64, Error> {
        Ok(self.counts.read().await.get(key).copied().unwrap_or(0))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.counts.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.counts.write().await.clear();
        Ok(())
    }
}
