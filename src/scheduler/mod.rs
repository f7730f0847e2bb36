//! Time-ordered retry scheduler.
//!
//! Pending retries sit in a min-heap keyed by execution time. A single
//! background loop sleeps until the earliest one is due (or until a new task
//! is scheduled) and then hands due requests back into the shared ingress
//! channel, the same one external submitters use.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::time::{sleep_until, Instant};

use crate::dispatch::RetryTask;
use crate::metrics::DispatchMetrics;
use crate::push::PushRequest;

struct TimedRetry(RetryTask);

impl PartialEq for TimedRetry {
    fn eq(&self, other: &Self) -> bool {
        self.0.execute_at.eq(&other.0.execute_at)
    }
}

impl Eq for TimedRetry {}

impl Ord for TimedRetry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other.0.execute_at.cmp(&self.0.execute_at)
    }
}

impl PartialOrd for TimedRetry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatsSnapshot {
    pub pending: usize,
    pub total_scheduled: u64,
    pub total_fired: u64,
}

/// Delayed re-delivery of push requests
pub struct RetryScheduler {
    pending: Mutex<BinaryHeap<TimedRetry>>,
    pending_count: AtomicUsize,
    total_scheduled: AtomicU64,
    total_fired: AtomicU64,
    wakeup: Notify,
    ingress: mpsc::Sender<Arc<PushRequest>>,
}

impl RetryScheduler {
    /// Create a scheduler that fires due requests into `ingress`
    pub fn new(ingress: mpsc::Sender<Arc<PushRequest>>) -> Self {
        Self {
            pending: Mutex::new(BinaryHeap::new()),
            pending_count: AtomicUsize::new(0),
            total_scheduled: AtomicU64::new(0),
            total_fired: AtomicU64::new(0),
            wakeup: Notify::new(),
            ingress,
        }
    }

    /// Add a task. Tasks already due fire on the loop's next pass.
    pub async fn schedule(&self, task: RetryTask) {
        tracing::trace!(
            request_id = %task.request.id,
            retry_count = task.request.retry_count,
            "Scheduling retry"
        );

        {
            let mut pending = self.pending.lock().await;
            pending.push(TimedRetry(task));
            self.pending_count.store(pending.len(), Ordering::Relaxed);
            DispatchMetrics::set_pending_retries(pending.len());
        }
        self.total_scheduled.fetch_add(1, Ordering::Relaxed);

        // Stores a permit if the loop is busy, so the wakeup is never lost
        self.wakeup.notify_one();
    }

    /// Number of tasks waiting to fire
    pub fn pending(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            pending: self.pending(),
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            total_fired: self.total_fired.load(Ordering::Relaxed),
        }
    }

    /// Run the scheduler loop until shutdown or until the ingress closes
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Retry scheduler started");

        loop {
            let next_due = match self.fire_due(Instant::now()).await {
                Ok(next_due) => next_due,
                Err(()) => {
                    tracing::warn!("Ingress closed, retry scheduler stopping");
                    break;
                }
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = self.wakeup.notified() => {}
                        _ = sleep_until(at) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = self.wakeup.notified() => {}
                    }
                }
            }
        }

        tracing::info!(pending = self.pending(), "Retry scheduler stopped");
    }

    /// Hand every task due at `now` to the ingress. Returns the execution time
    /// of the earliest task still pending, or `Err` if the ingress is closed.
    ///
    /// Tasks are removed from the heap before they are sent, so each one fires
    /// exactly once even with concurrent callers.
    async fn fire_due(&self, now: Instant) -> Result<Option<Instant>, ()> {
        let (due, next_due) = {
            let mut pending = self.pending.lock().await;
            let mut due = Vec::new();
            while pending.peek().is_some_and(|t| t.0.execute_at <= now) {
                if let Some(TimedRetry(task)) = pending.pop() {
                    due.push(task);
                }
            }
            self.pending_count.store(pending.len(), Ordering::Relaxed);
            DispatchMetrics::set_pending_retries(pending.len());
            (due, pending.peek().map(|t| t.0.execute_at))
        };

        for task in due {
            tracing::debug!(
                request_id = %task.request.id,
                service = %task.request.service,
                retry_count = task.request.retry_count,
                "Retry due, resubmitting"
            );
            self.total_fired.fetch_add(1, Ordering::Relaxed);
            DispatchMetrics::record_retry_fired();
            if self.ingress.send(task.request).await.is_err() {
                return Err(());
            }
        }

        Ok(next_due)
    }
}
