use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::Instant;

use crate::backend::BackendRegistry;
use crate::error::{DeliveryFailure, PushError};
use crate::events::EventSink;
use crate::metrics::DispatchMetrics;
use crate::push::{DeliveryPoint, ProviderDevicePair, PushRequest, PushServiceProvider};
use crate::scheduler::RetryScheduler;
use crate::store::CredentialStore;

use super::classifier::{classify, classify_residual, Disposition};
use super::retry::RetryPolicy;

/// Default upper bound on workers spawned per request
pub const DEFAULT_MAX_WORKERS: usize = 1024;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Maximum workers spawned for one request's fan-out
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one delivery attempt, kept until the owning worker flushes.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub delivery_point: Arc<DeliveryPoint>,
    /// Position of the subscriber within the worker's slice
    pub subscriber_index: usize,
    /// `None` when the attempt was retried or failed (already reported)
    pub message_id: Option<String>,
}

/// Side effects of one subscriber's attempts, reported once all of its
/// pairs have been tried.
enum Deferred {
    ProviderUpdated(String),
    DeliveryPointUpdated(String),
    Retry {
        delivery_point: Arc<DeliveryPoint>,
        error: PushError,
    },
    Failed {
        delivery_point: Option<Arc<DeliveryPoint>>,
        error: DeliveryFailure,
    },
}

/// Statistics for the push dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub requests_processed: AtomicU64,
    pub single_point_requests: AtomicU64,
    pub deliveries_succeeded: AtomicU64,
    pub deliveries_failed: AtomicU64,
    pub lookups_failed: AtomicU64,
    pub retries_scheduled: AtomicU64,
    pub retries_dropped: AtomicU64,
    pub credentials_refreshed: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            single_point_requests: self.single_point_requests.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            retries_dropped: self.retries_dropped.load(Ordering::Relaxed),
            credentials_refreshed: self.credentials_refreshed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub requests_processed: u64,
    pub single_point_requests: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub lookups_failed: u64,
    pub retries_scheduled: u64,
    pub retries_dropped: u64,
    pub credentials_refreshed: u64,
}

/// Split `total` subscribers into contiguous chunks for fan-out.
///
/// Chunks hold `max(total / max_workers, 1)` subscribers, at most
/// `max_workers` of them, followed by one remainder chunk when they don't
/// cover everything. The caller runs the last chunk itself.
pub fn partition(total: usize, max_workers: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return Vec::new();
    }

    let max_workers = max_workers.max(1);
    let per_chunk = (total / max_workers).max(1);
    let full_chunks = (total / per_chunk).min(max_workers);

    let mut chunks: Vec<Range<usize>> = (0..full_chunks)
        .map(|i| i * per_chunk..(i + 1) * per_chunk)
        .collect();

    let covered = full_chunks * per_chunk;
    if covered < total {
        chunks.push(covered..total);
    }
    chunks
}

/// Resolves subscribers, drives delivery backends and acts on their results.
pub struct PushDispatcher {
    config: DispatcherConfig,
    registry: Arc<BackendRegistry>,
    store: Arc<dyn CredentialStore>,
    events: Arc<dyn EventSink>,
    scheduler: Arc<RetryScheduler>,
    stats: DispatcherStats,
}

impl PushDispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<BackendRegistry>,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn EventSink>,
        scheduler: Arc<RetryScheduler>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            events,
            scheduler,
            stats: DispatcherStats::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver a request to all of its subscribers.
    ///
    /// Returns once every delivery attempt, with its credential write-backs
    /// and retry scheduling, has finished. Only the scheduled retries and the
    /// emitted events outlive the call.
    #[tracing::instrument(
        name = "dispatcher.process",
        skip(self, request),
        fields(
            request_id = %request.id,
            service = %request.service,
            subscriber_count = request.subscribers.len(),
            retry_count = request.retry_count
        )
    )]
    pub async fn process(self: &Arc<Self>, request: Arc<PushRequest>) {
        self.stats.requests_processed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subscribers = ?request.subscribers, "Push request received");

        if request.is_single_delivery_point() {
            DispatchMetrics::record_single_request();
            self.stats.single_point_requests.fetch_add(1, Ordering::Relaxed);
            self.push_to_single_delivery_point(&request).await;
            return;
        }

        let mut chunks = partition(request.subscribers.len(), self.config.max_workers);
        let Some(leftover) = chunks.pop() else {
            return;
        };

        let mut workers: FuturesUnordered<_> = chunks
            .into_iter()
            .map(|range| {
                let this = self.clone();
                let request = request.clone();
                tokio::spawn(async move { this.push_bulk(&request, range).await })
            })
            .collect();
        DispatchMetrics::record_fanout_request(workers.len());

        self.push_bulk(&request, leftover).await;

        while let Some(result) = workers.next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Push worker panicked");
            }
        }
    }

    /// Push to a slice of the request's subscribers in order, then report all
    /// successes in one pass.
    pub async fn push_bulk(&self, request: &Arc<PushRequest>, range: Range<usize>) {
        let subscribers = &request.subscribers[range];
        let mut outcomes = Vec::with_capacity(subscribers.len() * 2);

        for (index, subscriber) in subscribers.iter().enumerate() {
            outcomes.extend(self.push(request, subscriber, index).await);
        }

        for outcome in outcomes {
            if let Some(message_id) = outcome.message_id {
                self.report_success(
                    request,
                    &subscribers[outcome.subscriber_index],
                    &outcome.delivery_point,
                    &message_id,
                )
                .await;
            }
        }
    }

    /// Resolve one subscriber and attempt every pair it resolves to.
    ///
    /// A store failure is reported for the subscriber and ends its resolution
    /// without touching the rest of the request.
    pub async fn push(
        &self,
        request: &Arc<PushRequest>,
        subscriber: &str,
        subscriber_index: usize,
    ) -> Vec<DeliveryOutcome> {
        let pairs = match self.store.resolve_pairs(&request.service, subscriber).await {
            Ok(pairs) => pairs,
            Err(e) => {
                self.stats.lookups_failed.fetch_add(1, Ordering::Relaxed);
                let deferred = vec![Deferred::Failed {
                    delivery_point: None,
                    error: DeliveryFailure::Store(e),
                }];
                self.flush(request, subscriber, deferred).await;
                return Vec::new();
            }
        };

        if pairs.is_empty() {
            tracing::debug!(
                service = %request.service,
                subscriber = %subscriber,
                "Subscriber has no delivery points"
            );
            return Vec::new();
        }

        let mut deferred = Vec::new();
        let mut outcomes = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let message_id = self.deliver(request, subscriber, pair, &mut deferred).await;
            outcomes.push(DeliveryOutcome {
                delivery_point: pair.delivery_point.clone(),
                subscriber_index,
                message_id,
            });
        }

        self.flush(request, subscriber, deferred).await;
        outcomes
    }

    /// Deliver straight to the pair attached to the request, skipping the
    /// credential store. Used for retries and pre-resolved single targets.
    pub async fn push_to_single_delivery_point(&self, request: &Arc<PushRequest>) {
        let (Some(subscriber), Some(pair)) = (request.subscribers.first(), request.target()) else {
            tracing::warn!(request_id = %request.id, "Request has no attached delivery point");
            return;
        };

        let mut deferred = Vec::new();
        let message_id = self.deliver(request, subscriber, &pair, &mut deferred).await;
        self.flush(request, subscriber, deferred).await;

        if let Some(message_id) = message_id {
            self.report_success(request, subscriber, &pair.delivery_point, &message_id)
                .await;
        }
    }

    /// One backend call plus classification. Returns the message id when the
    /// attempt counts as delivered.
    async fn deliver(
        &self,
        request: &Arc<PushRequest>,
        subscriber: &str,
        pair: &ProviderDevicePair,
        deferred: &mut Vec<Deferred>,
    ) -> Option<String> {
        let Some(backend) = self.registry.get(&pair.provider) else {
            tracing::debug!(
                provider = %pair.provider.name,
                service_id = pair.provider.service_id,
                "Provider has invalid service type, skipping"
            );
            return None;
        };

        let started = Instant::now();
        let result = backend
            .push(&pair.provider, &pair.delivery_point, &request.notification)
            .await;
        DispatchMetrics::record_backend_latency(started.elapsed());

        let mut disposition = classify(&result);
        // Retries go out with whatever credentials the refresh left behind
        let mut target = pair.clone();

        if let Disposition::CredentialRefresh {
            message_id,
            provider,
            delivery_point,
            residual,
        } = disposition
        {
            if let Some(provider) = provider {
                self.write_back_provider(provider, deferred).await;
                target.provider = Arc::new(provider.clone());
            }
            if let Some(delivery_point) = delivery_point {
                self.write_back_delivery_point(delivery_point, deferred).await;
                target.delivery_point = Arc::new(delivery_point.clone());
            }

            disposition = match residual {
                Some(err) => classify_residual(err),
                None => Disposition::Success(message_id.unwrap_or_default()),
            };
        }

        match disposition {
            Disposition::Success(id) => Some(id.to_string()),
            Disposition::RetryAfter(retry_after) => {
                let delivery_point = target.delivery_point.clone();
                self.retry_request(request, retry_after, subscriber, target)
                    .await;
                if let Err(error) = &result {
                    deferred.push(Deferred::Retry {
                        delivery_point,
                        error: retry_reason(error).clone(),
                    });
                }
                None
            }
            Disposition::PermanentFailure(error) => {
                deferred.push(Deferred::Failed {
                    delivery_point: Some(pair.delivery_point.clone()),
                    error: DeliveryFailure::Push(error.clone()),
                });
                None
            }
            Disposition::CredentialRefresh { .. } => None,
        }
    }

    /// Schedule the retry of `request` for one subscriber's pair, or drop it
    /// silently once the chain is out of retries.
    pub async fn retry_request(
        &self,
        request: &Arc<PushRequest>,
        retry_after: Duration,
        subscriber: &str,
        target: ProviderDevicePair,
    ) {
        let delivery_point = target.delivery_point.name.clone();
        match self
            .config
            .retry
            .build_retry(request, retry_after, subscriber, target, Instant::now())
        {
            Some(task) => {
                self.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_retry_scheduled();
                self.scheduler.schedule(task).await;
            }
            None => {
                self.stats.retries_dropped.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_retry_dropped();
                tracing::debug!(
                    request_id = %request.id,
                    subscriber = %subscriber,
                    delivery_point = %delivery_point,
                    retry_count = request.retry_count,
                    "Retry limit reached, dropping"
                );
            }
        }
    }

    async fn write_back_provider(
        &self,
        provider: &PushServiceProvider,
        deferred: &mut Vec<Deferred>,
    ) {
        self.stats.credentials_refreshed.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_credential_refresh("provider");
        if let Err(e) = self.store.update_provider(provider).await {
            tracing::warn!(provider = %provider.name, error = %e, "Failed to update provider");
        }
        deferred.push(Deferred::ProviderUpdated(provider.name.clone()));
    }

    async fn write_back_delivery_point(
        &self,
        delivery_point: &DeliveryPoint,
        deferred: &mut Vec<Deferred>,
    ) {
        self.stats.credentials_refreshed.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_credential_refresh("delivery_point");
        if let Err(e) = self.store.update_delivery_point(delivery_point).await {
            tracing::warn!(
                delivery_point = %delivery_point.name,
                error = %e,
                "Failed to update delivery point"
            );
        }
        deferred.push(Deferred::DeliveryPointUpdated(delivery_point.name.clone()));
    }

    /// Emit the logs and failure events held back while delivering.
    async fn flush(&self, request: &PushRequest, subscriber: &str, deferred: Vec<Deferred>) {
        for item in deferred {
            match item {
                Deferred::ProviderUpdated(name) => {
                    tracing::info!(service = %request.service, provider = %name, "Provider updated");
                }
                Deferred::DeliveryPointUpdated(name) => {
                    tracing::info!(delivery_point = %name, "Delivery point updated");
                }
                Deferred::Retry {
                    delivery_point,
                    error,
                } => {
                    tracing::info!(
                        request_id = %request.id,
                        service = %request.service,
                        subscriber = %subscriber,
                        delivery_point = %delivery_point.name,
                        retry_count = request.retry_count,
                        error = %error,
                        "Push retry"
                    );
                }
                Deferred::Failed {
                    delivery_point,
                    error,
                } => {
                    self.stats.deliveries_failed.fetch_add(1, Ordering::Relaxed);
                    DispatchMetrics::record_failed(error.reason());
                    tracing::warn!(
                        request_id = %request.id,
                        service = %request.service,
                        subscriber = %subscriber,
                        delivery_point = delivery_point.as_ref().map(|dp| dp.name.as_str()).unwrap_or("-"),
                        error = %error,
                        "Push failed"
                    );
                    self.events
                        .on_delivery_failure(request, subscriber, delivery_point.as_deref(), &error)
                        .await;
                }
            }
        }
    }

    async fn report_success(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: &DeliveryPoint,
        message_id: &str,
    ) {
        self.stats.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_delivered(1);
        tracing::info!(
            request_id = %request.id,
            service = %request.service,
            subscriber = %subscriber,
            delivery_point = %delivery_point.name,
            message_id = %message_id,
            "Push delivered"
        );
        self.events
            .on_delivery_success(request, subscriber, delivery_point, message_id)
            .await;
    }
}

/// The retry error behind a disposition, looking through a refresh.
fn retry_reason(error: &PushError) -> &PushError {
    match error {
        PushError::Refresh {
            residual: Some(residual),
            ..
        } => residual,
        other => other,
    }
}
