//! Metrics helper struct for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BACKEND_LATENCY, CREDENTIAL_REFRESH_TOTAL, DELIVERIES_FAILED_TOTAL, DELIVERIES_SUCCEEDED_TOTAL,
    FANOUT_WORKERS, REQUESTS_PROCESSED_TOTAL, RETRIES_DROPPED_TOTAL, RETRIES_FIRED_TOTAL,
    RETRIES_PENDING, RETRIES_SCHEDULED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a request that went through subscriber fan-out
    pub fn record_fanout_request(workers: usize) {
        REQUESTS_PROCESSED_TOTAL.with_label_values(&["fanout"]).inc();
        FANOUT_WORKERS.observe(workers as f64);
    }

    /// Record a request delivered straight to its attached delivery point
    pub fn record_single_request() {
        REQUESTS_PROCESSED_TOTAL.with_label_values(&["single"]).inc();
    }

    pub fn record_delivered(count: u64) {
        DELIVERIES_SUCCEEDED_TOTAL.inc_by(count);
    }

    /// Record a permanent failure, labelled by reason
    pub fn record_failed(reason: &str) {
        DELIVERIES_FAILED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_backend_latency(elapsed: Duration) {
        BACKEND_LATENCY.observe(elapsed.as_secs_f64());
    }

    pub fn record_retry_scheduled() {
        RETRIES_SCHEDULED_TOTAL.inc();
    }

    pub fn record_retry_fired() {
        RETRIES_FIRED_TOTAL.inc();
    }

    pub fn record_retry_dropped() {
        RETRIES_DROPPED_TOTAL.inc();
    }

    pub fn set_pending_retries(count: usize) {
        RETRIES_PENDING.set(count as i64);
    }

    /// Record a credential write-back ("provider" or "delivery_point")
    pub fn record_credential_refresh(kind: &str) {
        CREDENTIAL_REFRESH_TOTAL.with_label_values(&[kind]).inc();
    }
}
