//! Fixed-size worker pool fed by a bounded task channel.
//!
//! Each worker waits on either the shared cancellation token or the next task.
//! A task runs in its own spawned future so an error or a panic is reported to
//! that task's `on_failure` and the worker moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// A unit of work.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self) -> Result<(), Error>;

    /// Called exactly once when `execute` fails, panics, or the task cannot
    /// be submitted. Retrying is up to the task.
    async fn on_failure(&self, error: Error);
}

type TaskRx = Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<dyn Task>>>>;

pub struct WorkerPool {
    workers: usize,
    capacity: usize,
    submit_wait: Duration,
    tx: mpsc::Sender<Arc<dyn Task>>,
    rx: TaskRx,
    cancel: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// `workers` concurrent executors behind a channel of `capacity` tasks.
    pub fn new(workers: usize, capacity: usize) -> Result<Self, Error> {
        if workers == 0 || capacity == 0 {
            return Err(Error::InvalidConfig("worker pool needs at least one worker and one slot".into()));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            workers,
            capacity,
            submit_wait: Duration::from_secs(30),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// How long a submission may wait for channel space before failing.
    pub fn with_submit_wait(mut self, wait: Duration) -> Self {
        self.submit_wait = wait;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Launch the workers. Later calls do nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for id in 0..self.workers {
            let rx = Arc::clone(&self.rx);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(worker_loop(id, rx, cancel)));
        }
        tracing::info!(workers = self.workers, capacity = self.capacity, "worker pool started");
    }

    /// Signal every worker to exit. Running tasks finish; later calls do nothing.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        tracing::info!("worker pool stopping");
    }

    /// Wait for all workers to exit after [`WorkerPool::stop`], then fail any
    /// task still waiting in the channel with [`Error::PoolStopped`].
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            let _ = handle.await;
        }
        if !self.cancel.is_cancelled() {
            return;
        }
        let mut rx = self.rx.lock().await;
        while let Ok(task) = rx.try_recv() {
            task.on_failure(Error::PoolStopped).await;
        }
    }

    /// Submit `task` without blocking the caller.
    ///
    /// When the channel is full a background wait of up to the submit wait is
    /// spawned; if no slot frees up the task fails with
    /// [`Error::PoolSaturated`]. Must be called inside a Tokio runtime.
    pub fn add_work(&self, task: Arc<dyn Task>) {
        if self.cancel.is_cancelled() {
            tokio::spawn(async move { task.on_failure(Error::PoolStopped).await });
            return;
        }
        let task = match self.tx.try_send(task) {
            Ok(()) => return,
            Err(TrySendError::Closed(task)) => {
                tokio::spawn(async move { task.on_failure(Error::PoolStopped).await });
                return;
            }
            Err(TrySendError::Full(task)) => task,
        };

        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let wait = self.submit_wait;
        let capacity = self.capacity;
        tokio::spawn(async move {
            let reserved = tokio::select! {
                _ = cancel.cancelled() => {
                    task.on_failure(Error::PoolStopped).await;
                    return;
                }
                reserved = tokio::time::timeout(wait, tx.reserve()) => reserved,
            };
            match reserved {
                Ok(Ok(permit)) => permit.send(task),
                Ok(Err(_)) => task.on_failure(Error::PoolStopped).await,
                Err(_) => {
                    tracing::warn!(capacity, "worker pool saturated, dropping task");
                    task.on_failure(Error::PoolSaturated { capacity }).await;
                }
            }
        });
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(id: usize, rx: TaskRx, cancel: CancellationToken) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(task) = next else { break };
        run_task(id, task).await;
    }
    tracing::debug!(worker = id, "worker exited");
}

async fn run_task(id: usize, task: Arc<dyn Task>) {
    let running = Arc::clone(&task);
    let error = match tokio::spawn(async move { running.execute().await }).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(join) => Error::TaskPanicked(join.to_string()),
    };
    tracing::debug!(worker = id, error = %error, "task failed");
    if let Err(join) = tokio::spawn(async move { task.on_failure(error).await }).await {
        tracing::warn!(worker = id, error = %join, "task failure handler panicked");
    }
}
