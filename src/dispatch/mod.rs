//! Push dispatching: subscriber fan-out, result classification and retry
//! construction.

pub mod classifier;
mod dispatcher;
pub mod retry;

pub use classifier::{classify, classify_residual, Disposition};
pub use dispatcher::{
    partition, DeliveryOutcome, DispatcherConfig, DispatcherStats, DispatcherStatsSnapshot,
    PushDispatcher, DEFAULT_MAX_WORKERS,
};
pub use retry::{RetryPolicy, RetryTask, MAX_RETRY_DELAY};
