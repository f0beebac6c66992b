//! Grid Executor
//!
//! Single serialization point for grid work. Connection tasks never touch the
//! grid directly for writes, deletes or cache-miss reads: they hand a closure
//! to the executor and await its result.
//!
//! ```text
//!   conn task ──┐
//!   conn task ──┼──> [ FIFO queue ] ──> grid thread ──> BlockDatabase
//!   console   ──┘                           │
//!        ▲                                  │
//!        └──────────── oneshot reply ───────┘
//! ```
//!
//! Jobs run one at a time in submission order. A caller that waits longer
//! than the operation timeout gets an error; the job itself still runs.

use crate::error::{StoreError, StoreResult};
use crate::storage::BlockDatabase;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce(&BlockDatabase) + Send + 'static>;

struct Inner {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the grid thread.
#[derive(Clone)]
pub struct GridExecutor {
    inner: Arc<Inner>,
    db: Arc<BlockDatabase>,
    timeout: Duration,
}

impl std::fmt::Debug for GridExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridExecutor")
            .field("timeout", &self.timeout)
            .field("running", &self.inner.tx.lock().is_some())
            .finish()
    }
}

impl GridExecutor {
    /// Spawns the grid thread.
    pub fn start(db: Arc<BlockDatabase>, timeout: Duration) -> StoreResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker_db = Arc::clone(&db);

        let thread = std::thread::Builder::new()
            .name("grid-executor".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(|| job(&worker_db))).is_err() {
                        error!("Grid job panicked");
                    }
                }
                debug!("Grid executor queue closed");
            })
            .map_err(|e| StoreError::Internal(format!("failed to spawn grid thread: {}", e)))?;

        info!(timeout_secs = timeout.as_secs(), "Grid executor started");

        Ok(Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                thread: Mutex::new(Some(thread)),
            }),
            db,
            timeout,
        })
    }

    pub fn db(&self) -> &Arc<BlockDatabase> {
        &self.db
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queues `job` without waiting for it.
    pub fn submit<F>(&self, job: F) -> StoreResult<()>
    where
        F: FnOnce(&BlockDatabase) + Send + 'static,
    {
        let guard = self.inner.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| StoreError::Internal("grid executor is shut down".to_string()))?;
        tx.send(Box::new(job))
            .map_err(|_| StoreError::Internal("grid executor is shut down".to_string()))
    }

    /// Runs `op` on the grid thread and waits for its result.
    pub async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&BlockDatabase) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(move |db| {
            let _ = reply_tx.send(op(db));
        })?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Internal(
                "grid operation was dropped".to_string(),
            )),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), "Grid operation timed out");
                Err(StoreError::Internal(format!(
                    "grid operation timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Closes the queue and waits for queued jobs to finish.
    ///
    /// Must not be called from the grid thread itself.
    pub fn shutdown(&self) {
        let tx = self.inner.tx.lock().take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        if let Some(thread) = self.inner.thread.lock().take() {
            if thread.join().is_err() {
                error!("Grid thread terminated abnormally");
            }
        }
        info!("Grid executor stopped");
    }
}
