use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{Outcome, WorkQueue};

/// Processes one key end-to-end. Failures are folded into the returned [`Outcome`].
#[async_trait::async_trait]
pub trait Handler<K>: Send + Sync {
    async fn handle(&self, key: K) -> Outcome;
}

/// Parallel workers draining one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks (at least one) pulling keys until the queue shuts down.
    pub fn spawn<K, H>(queue: WorkQueue<K>, workers: usize, handler: Arc<H>) -> Self
    where
        K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
        H: Handler<K> + ?Sized + 'static,
    {
        let n = workers.max(1);
        let handles = (0..n)
            .map(|id| {
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    while let Some(key) = queue.dequeue().await {
                        // A panicking handler must not take the worker down with it.
                        let outcome = match AssertUnwindSafe(handler.handle(key.clone())).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                error!(worker = id, ?key, "handler panicked; retrying key");
                                Outcome::Retry
                            }
                        };
                        queue.done(&key, outcome);
                    }
                    info!(worker = id, "worker stopped");
                })
            })
            .collect();
        info!(workers = n, "worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all workers to exit (after the queue has been shut down).
    pub async fn join(self) {
        for h in self.handles {
            if let Err(e) = h.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}
