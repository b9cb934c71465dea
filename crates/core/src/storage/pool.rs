//! Path-keyed sharing of storage handles.
//!
//! Opening the same database file twice in one process either wastes a
//! connection (SQLite) or fails outright (sled holds an exclusive lock). A
//! [`ConnectionPool`] hands out one shared handle per path; the handle is
//! closed when the last holder drops it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::Error;

/// Shares one `T` per path, up to `max_open` distinct live paths.
#[derive(Debug)]
pub struct ConnectionPool<T> {
    max_open: usize,
    handles: Mutex<HashMap<PathBuf, Weak<T>>>,
}

impl<T> ConnectionPool<T> {
    pub fn new(max_open: usize) -> Self {
        Self { max_open, handles: Mutex::new(HashMap::new()) }
    }

    /// Return the live handle for `path`, or open one with `open`.
    ///
    /// # Errors
    ///
    /// `BlankPath` for an empty path, `ConnectionLimit` when `max_open`
    /// distinct paths are already held, or whatever `open` returns.
    pub async fn acquire<F, Fut>(&self, path: impl AsRef<Path>, open: F) -> Result<Arc<T>, Error>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::BlankPath);
        }

        let mut handles = self.handles.lock().await;
        handles.retain(|_, handle| handle.strong_count() > 0);

        if let Some(handle) = handles.get(path).and_then(Weak::upgrade) {
            return Ok(handle);
        }
        if handles.len() >= self.max_open {
            return Err(Error::ConnectionLimit(self.max_open));
        }

        let handle = Arc::new(open(path.to_path_buf()).await?);
        handles.insert(path.to_path_buf(), Arc::downgrade(&handle));
        tracing::debug!(path = %path.display(), "opened shared storage handle");
        Ok(handle)
    }

    /// Number of paths with at least one live holder.
    pub async fn open_count(&self) -> usize {
        self.handles
            .lock()
            .await
            .values()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }
}

impl<T> Default for ConnectionPool<T> {
    fn default() -> Self {
        Self::new(16)
    }
}
