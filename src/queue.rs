//! Bounded-retry work queue
//!
//! Keys (conventionally `namespace/name`) are enqueued on every observed
//! change and drained by a fixed pool of workers. The queue deduplicates
//! pending keys, guarantees a key is owned by at most one worker at a
//! time, and re-queues failed keys with per-key exponential backoff up
//! to a fixed attempt cap. Handlers re-read current state from the cache
//! by key, so a coalesced re-add after an in-flight run always processes
//! the newest state, never a stale payload.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Number of times a key is processed before it is permanently forgotten
pub const MAX_RETRIES: u32 = 20;

/// Handler invoked by queue workers for each dequeued key
pub type QueueHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    // Keys re-added while in flight; moved back to the queue on done().
    coalesced: HashSet<String>,
    attempts: HashMap<String, u32>,
    shutdown: bool,
}

/// Deduplicating, rate-limited work dispatcher.
///
/// All synchronization is internal; callers never lock around
/// enqueue/dequeue.
pub struct RetryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryQueue {
    /// Create a queue with the default backoff (5ms doubling, 30s cap)
    pub fn new() -> Self {
        Self::with_backoff(Duration::from_millis(5), Duration::from_secs(30))
    }

    /// Create a queue with an explicit per-key backoff range
    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue a key.
    ///
    /// A key already waiting in the queue is not added twice. A key
    /// currently being processed is coalesced: it re-queues once the
    /// in-flight run completes, and the handler then sees the latest
    /// cached state.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.shutdown || state.queued.contains(&key) {
            return;
        }
        if state.in_flight.contains(&key) {
            state.coalesced.insert(key);
            return;
        }
        state.queued.insert(key.clone());
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a key after its rate-limiter-computed backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, key: impl Into<String>) {
        let key = key.into();
        let delay = self.delay_for(&key);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Record a handler failure for a key and return the total failure
    /// count for its current occurrence
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let count = state.attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Failures recorded for a key since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        let state = self.state.lock().expect("queue lock poisoned");
        state.attempts.get(key).copied().unwrap_or(0)
    }

    /// Exponential backoff delay for the key's next attempt
    fn delay_for(&self, key: &str) -> Duration {
        let failures = self.num_requeues(key).saturating_sub(1).min(32);
        let delay = self
            .base_delay
            .saturating_mul(1u32.checked_shl(failures).unwrap_or(u32::MAX));
        delay.min(self.max_delay)
    }

    /// Wait for the next key, or `None` once the queue is shut down.
    ///
    /// The returned key is marked in flight: no other worker can dequeue
    /// it until [`RetryQueue::done`] is called.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a key's processing finished.
    ///
    /// Must be called exactly once per successful [`RetryQueue::get`],
    /// regardless of handler outcome. A coalesced re-add goes back on
    /// the queue here.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.in_flight.remove(key);
        if state.coalesced.remove(key) && !state.shutdown && !state.queued.contains(key) {
            state.queued.insert(key.to_string());
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the attempt counter for a key; a future enqueue of the same
    /// key starts a fresh occurrence
    pub fn forget(&self, key: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.attempts.remove(key);
    }

    /// Stop the queue: blocked and future `get` calls return `None`
    pub fn shut_down(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.shutdown = true;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Keys waiting in the queue (excluding in-flight ones)
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").queue.len()
    }

    /// Whether nothing is waiting in the queue
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Process one queue item.
///
/// Returns `Ok(false)` when the queue has shut down. Handler success
/// forgets the key. A retryable failure below the attempt cap re-queues
/// the key with backoff and is not surfaced; a non-retryable failure
/// (translation, malformed payload, configuration) drops the key on the
/// spot, since no number of attempts can change the outcome. Either
/// terminal path forgets the key and surfaces exactly one error for
/// this occurrence.
pub async fn handle_item(queue: &Arc<RetryQueue>, handler: &QueueHandler) -> Result<bool> {
    let Some(key) = queue.get().await else {
        return Ok(false);
    };
    debug!(key = %key, "Got queue item");

    let result = handler(key.clone()).await;
    queue.done(&key);

    match result {
        Ok(()) => {
            queue.forget(&key);
            Ok(true)
        }
        Err(err) if !err.is_retryable() => {
            queue.forget(&key);
            Err(err)
        }
        Err(err) => {
            let failures = queue.record_failure(&key);
            if failures < MAX_RETRIES {
                warn!(key = %key, attempt = failures, error = %err, "Requeuing key after failed sync");
                queue.add_rate_limited(key);
                return Ok(true);
            }
            queue.forget(&key);
            Err(Error::MaxRetries {
                key,
                last_error: err.to_string(),
            })
        }
    }
}

/// Worker loop: drain the queue until shutdown.
///
/// Per-key terminal failures are reported to the log sink; the worker
/// never dies on one.
pub async fn run_worker(worker_id: usize, queue: Arc<RetryQueue>, handler: QueueHandler) {
    debug!(worker = worker_id, "Queue worker started");
    loop {
        match handle_item(&queue, &handler).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => error!(worker = worker_id, error = %err, "Giving up on queue item"),
        }
    }
    debug!(worker = worker_id, "Queue worker stopped");
}

/// Spawn `workers` worker tasks on the queue, shutting the queue down
/// when `stop` fires.
pub fn spawn_workers(
    workers: usize,
    queue: Arc<RetryQueue>,
    handler: QueueHandler,
    stop: CancellationToken,
) {
    for worker_id in 0..workers {
        tokio::spawn(run_worker(worker_id, Arc::clone(&queue), handler.clone()));
    }
    let queue = Arc::clone(&queue);
    tokio::spawn(async move {
        stop.cancelled().await;
        queue.shut_down();
    });
}
