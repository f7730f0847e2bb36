//! Prometheus metrics for the push dispatch service.
//!
//! - Request metrics (processed requests by dispatch path, fan-out width)
//! - Delivery metrics (successes, failures by reason, backend latency)
//! - Retry metrics (scheduled, fired, dropped, pending)
//! - Credential refresh metrics

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "push";

lazy_static! {
    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// Requests processed by dispatch path ("fanout" or "single")
    pub static ref REQUESTS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_processed_total", METRIC_PREFIX),
        "Total push requests processed",
        &["path"]
    ).unwrap();

    /// Workers spawned per fan-out request
    pub static ref FANOUT_WORKERS: Histogram = register_histogram!(
        format!("{}_fanout_workers", METRIC_PREFIX),
        "Number of workers spawned per push request",
        vec![0.0, 1.0, 4.0, 16.0, 64.0, 256.0, 1024.0]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Successful deliveries
    pub static ref DELIVERIES_SUCCEEDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_succeeded_total", METRIC_PREFIX),
        "Total deliveries accepted by a push network"
    ).unwrap();

    /// Failed deliveries by reason ("store" or "backend")
    pub static ref DELIVERIES_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_failed_total", METRIC_PREFIX),
        "Total deliveries that failed permanently",
        &["reason"]
    ).unwrap();

    /// Backend call latency
    pub static ref BACKEND_LATENCY: Histogram = register_histogram!(
        format!("{}_backend_latency_seconds", METRIC_PREFIX),
        "Push backend call latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Retries handed to the scheduler
    pub static ref RETRIES_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_scheduled_total", METRIC_PREFIX),
        "Total retries scheduled"
    ).unwrap();

    /// Retries resubmitted by the scheduler
    pub static ref RETRIES_FIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_fired_total", METRIC_PREFIX),
        "Total retries resubmitted to the dispatcher"
    ).unwrap();

    /// Retries dropped because the chain reached its retry limit
    pub static ref RETRIES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_dropped_total", METRIC_PREFIX),
        "Total retries dropped after exhausting the retry limit"
    ).unwrap();

    /// Retries waiting in the scheduler
    pub static ref RETRIES_PENDING: IntGauge = register_int_gauge!(
        format!("{}_retries_pending", METRIC_PREFIX),
        "Retries waiting in the scheduler"
    ).unwrap();

    // ============================================================================
    // Credential Metrics
    // ============================================================================

    /// Credential write-backs by kind ("provider" or "delivery_point")
    pub static ref CREDENTIAL_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_credential_refresh_total", METRIC_PREFIX),
        "Total credential refreshes written back to the store",
        &["kind"]
    ).unwrap();
}
