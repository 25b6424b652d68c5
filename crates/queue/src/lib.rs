//! Work queue for reconcile keys.
//!
//! Semantics:
//! - a key queued more than once before it is picked up is handed out once
//! - a key is never handed to two workers at the same time; re-adds while it
//!   is in flight are parked and released by [`WorkQueue::done`]
//! - failures re-enqueue with per-key exponential backoff
//! - no ordering between distinct keys beyond FIFO of first enqueue

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tracing::{debug, trace};

mod worker;

pub use worker::{Handler, WorkerPool};

/// What the worker wants done with a key once it has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Success or a failure retrying cannot fix; resets the backoff.
    Forget,
    /// Transient failure; re-enqueue after the key's next backoff delay.
    Retry,
    /// Re-enqueue after a fixed delay; resets the backoff.
    RequeueAfter(Duration),
}

/// Per-key exponential backoff: `base * 2^(failures-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be handed out, either queued or parked behind an in-flight run.
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    failures: FxHashMap<K, u32>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: Backoff,
}

/// Cloneable handle to a shared queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(Backoff::default())
    }

    pub fn with_backoff(backoff: Backoff) -> Self {
        let state = State {
            queue: VecDeque::new(),
            dirty: FxHashSet::default(),
            processing: FxHashSet::default(),
            failures: FxHashMap::default(),
            shutting_down: false,
        };
        Self { inner: Arc::new(Inner { state: Mutex::new(state), notify: Notify::new(), backoff }) }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Failures recorded for `key` since its last success.
    pub fn failures(&self, key: &K) -> u32 {
        self.inner.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub fn enqueue(&self, key: K) {
        let depth = {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                trace!(?key, "queue shutting down; dropping key");
                return;
            }
            if !st.dirty.insert(key.clone()) {
                trace!(?key, "key already pending");
                return;
            }
            if st.processing.contains(&key) {
                trace!(?key, "key in flight; parked until done");
                return;
            }
            st.queue.push_back(key);
            st.queue.len()
        };
        gauge!("queue_depth", depth as f64);
        self.inner.notify.notify_one();
    }

    pub fn enqueue_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }
        let q = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.enqueue(key);
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down and drained.
    pub async fn dequeue(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.inner.state.lock();
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    let depth = st.queue.len();
                    drop(st);
                    gauge!("queue_depth", depth as f64);
                    return Some(key);
                }
                if st.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer in flight and applies the outcome.
    pub fn done(&self, key: &K, outcome: Outcome) {
        let retry_delay = {
            let mut st = self.inner.state.lock();
            st.processing.remove(key);
            let retry_delay = match outcome {
                Outcome::Retry => {
                    let n = st.failures.entry(key.clone()).or_insert(0);
                    *n = n.saturating_add(1);
                    Some(self.inner.backoff.delay(*n))
                }
                Outcome::Forget | Outcome::RequeueAfter(_) => {
                    st.failures.remove(key);
                    None
                }
            };
            if st.dirty.contains(key) && !st.shutting_down {
                st.queue.push_back(key.clone());
                drop(st);
                self.inner.notify.notify_one();
            }
            retry_delay
        };
        match (outcome, retry_delay) {
            (Outcome::Retry, Some(delay)) => {
                counter!("queue_retries", 1u64);
                debug!(?key, ?delay, "requeue with backoff");
                self.enqueue_after(key.clone(), delay);
            }
            (Outcome::RequeueAfter(delay), _) => self.enqueue_after(key.clone(), delay),
            _ => {}
        }
    }

    /// Stop accepting keys; workers drain what is queued and then see `None`.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
