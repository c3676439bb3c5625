//! Work dispatcher
//!
//! A [`WorkerPool`] feeds keys to one [`Reconciler`] from a deduplicating
//! queue. Passes for different keys run concurrently on `workers` tasks;
//! a key is never reconciled by two workers at once.
//!
//! ## Queue rules
//!
//! - A key that is already queued is not queued twice
//! - A key enqueued while in flight is re-queued once its pass finishes
//! - `RequeueAfter(d)` and retryable failures schedule the key after `d`
//! - Every stored key is enqueued on start and on each resync tick
//!
//! ## Shutdown
//!
//! Once the shutdown signal fires no new pass starts. Passes already in
//! flight run to completion and delayed requeues are dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::engine::{ReconcileResult, Reconciler};
use crate::error::Result;
use crate::model::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    /// Keys enqueued while their pass was running
    dirty: HashSet<ObjectKey>,
}

#[derive(Debug, Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl WorkQueue {
    async fn push(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Take the next key and mark it in flight
    ///
    /// `Notify` holds a single permit, so a taker that leaves keys behind
    /// passes the wake-up on to another idle worker.
    async fn pop(&self) -> Option<ObjectKey> {
        let mut state = self.state.lock().await;
        let key = state.pending.pop_front()?;
        state.queued.remove(&key);
        state.in_flight.insert(key.clone());
        let more = !state.pending.is_empty();
        drop(state);
        if more {
            self.ready.notify_one();
        }
        Some(key)
    }

    async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    async fn depth(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.pending.len(), state.in_flight.len())
    }
}

/// Concurrent dispatcher for one reconciler
///
/// # Example
///
/// ```rust,ignore
/// let pool = Arc::new(WorkerPool::new(Arc::new(reconciler), 4));
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// let runner = tokio::spawn({
///     let pool = pool.clone();
///     async move { pool.run_with_shutdown(rx).await }
/// });
///
/// pool.enqueue(ObjectKey::new("team-a", "etl")).await;
/// // ...
/// let _ = tx.send(());
/// runner.await??;
/// ```
pub struct WorkerPool {
    reconciler: Arc<Reconciler>,
    workers: usize,
    queue: Arc<WorkQueue>,
}

impl WorkerPool {
    /// Create a pool with `workers` concurrent passes (at least one)
    pub fn new(reconciler: Arc<Reconciler>, workers: usize) -> Self {
        Self {
            reconciler,
            workers: workers.max(1),
            queue: Arc::new(WorkQueue::default()),
        }
    }

    /// Create a pool sized by the reconciler's configuration
    pub fn from_config(reconciler: Arc<Reconciler>) -> Self {
        let workers = reconciler.config().workers;
        Self::new(reconciler, workers)
    }

    /// Request a pass for `key`
    pub async fn enqueue(&self, key: ObjectKey) {
        self.queue.push(key).await;
    }

    /// Number of queued keys and keys currently being reconciled
    pub async fn depth(&self) -> (usize, usize) {
        self.queue.depth().await
    }

    /// Run until SIGINT
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            let _ = tx.send(());
        });
        self.run_with_shutdown(rx).await
    }

    /// Run until `shutdown_rx` fires (or its sender is dropped)
    pub async fn run_with_shutdown(&self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let kind = self.reconciler.kind();
        for key in self.reconciler.keys().await? {
            self.queue.push(key).await;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            handles.push(tokio::spawn(worker(
                id,
                self.reconciler.clone(),
                self.queue.clone(),
                stop_rx.clone(),
            )));
        }
        info!(%kind, workers = self.workers, "Worker pool started");

        let resync = self.reconciler.config().resync_interval();
        let resync_enabled = !resync.is_zero();
        let period = if resync_enabled { resync } else { Duration::from_secs(3600) };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);

        loop {
            tokio::select! {
                Some(_) = ticks.next(), if resync_enabled => {
                    match self.reconciler.keys().await {
                        Ok(keys) => {
                            debug!(%kind, count = keys.len(), "Resync tick");
                            for key in keys {
                                self.queue.push(key).await;
                            }
                        }
                        Err(e) => warn!(%kind, "Failed to list objects for resync: {}", e),
                    }
                }

                _ = &mut shutdown_rx => {
                    info!(%kind, "Shutdown signal received");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(%kind, "Worker task failed: {}", e);
            }
        }
        info!(%kind, "Worker pool stopped");
        Ok(())
    }
}

async fn worker(
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        let Some(key) = queue.pop().await else {
            tokio::select! {
                _ = queue.ready.notified() => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        // Not raced against shutdown: an in-flight pass always completes
        let result = reconciler.reconcile(&key).await;
        queue.done(&key).await;
        debug!(worker = id, %key, ?result, "Pass dispatched");

        if let Some(delay) = result.requeue_after() {
            schedule(queue.clone(), key, delay, stop.clone(), &result).await;
        }
    }
    debug!(worker = id, "Worker stopped");
}

async fn schedule(
    queue: Arc<WorkQueue>,
    key: ObjectKey,
    delay: Duration,
    mut stop: watch::Receiver<bool>,
    result: &ReconcileResult,
) {
    if delay.is_zero() {
        queue.push(key).await;
        return;
    }
    if let Some(kind) = result.failure_kind() {
        debug!(%key, reason = kind.reason(), ?delay, "Retry scheduled");
    }
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => queue.push(key).await,
            _ = stop.changed() => {}
        }
    });
}
