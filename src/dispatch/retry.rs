//! Retry request construction.
//!
//! Backoff starts at `initial_backoff` and doubles on every retry of the same
//! chain with no jitter and no cap. The chain ends once `max_retries` is
//! reached. Only the delay before a retry fires is clamped, to
//! [`MAX_RETRY_DELAY`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::push::{ProviderDevicePair, PushRequest};

/// Longest a retry can wait in the scheduler, whatever the backoff or the
/// backend's retry-after say
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Retry policy for failed deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retry count a chain can reach
    pub max_retries: u32,
    /// Backoff applied to the first retry
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(3),
        }
    }
}

/// A request waiting in the scheduler until `execute_at`
#[derive(Debug)]
pub struct RetryTask {
    pub execute_at: Instant,
    pub request: Arc<PushRequest>,
}

impl RetryPolicy {
    /// Backoff for the retry that follows `original`.
    pub fn next_backoff(&self, original: &PushRequest) -> Duration {
        if original.retry_count == 0 || original.backoff.is_zero() {
            self.initial_backoff
        } else {
            original.backoff.saturating_mul(2)
        }
    }

    /// Build the retry of `original` for one subscriber and its resolved pair.
    ///
    /// Returns `None` once the chain has used up its retries. The task runs at
    /// the later of `now + backoff` and `now + retry_after`, no later than
    /// `now + MAX_RETRY_DELAY`.
    pub fn build_retry(
        &self,
        original: &Arc<PushRequest>,
        retry_after: Duration,
        subscriber: &str,
        target: ProviderDevicePair,
        now: Instant,
    ) -> Option<RetryTask> {
        if original.retry_count >= self.max_retries {
            return None;
        }

        let backoff = self.next_backoff(original);
        let request = PushRequest {
            id: original.id,
            service: original.service.clone(),
            notification: original.notification.clone(),
            subscribers: vec![subscriber.to_string()],
            provider: Some(target.provider),
            delivery_point: Some(target.delivery_point),
            retry_count: original.retry_count + 1,
            backoff,
            previous: Some(original.clone()),
            punched_at: Utc::now(),
        };

        let delay = backoff.max(retry_after).min(MAX_RETRY_DELAY);
        Some(RetryTask {
            execute_at: now + delay,
            request: Arc::new(request),
        })
    }
}
