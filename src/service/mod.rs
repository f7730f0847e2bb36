//! Service wiring: one shared ingress channel feeding the dispatcher.
//!
//! External submissions and scheduler retries both arrive through the same
//! channel, so the dispatcher cannot tell them apart.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::backend::BackendRegistry;
use crate::dispatch::{DispatcherConfig, PushDispatcher};
use crate::error::{AppError, Result};
use crate::events::EventSink;
use crate::push::PushRequest;
use crate::scheduler::RetryScheduler;
use crate::store::CredentialStore;

/// Default capacity of the ingress channel
pub const DEFAULT_INGRESS_CAPACITY: usize = 1024;

/// Running push service
pub struct PushService {
    dispatcher: Arc<PushDispatcher>,
    scheduler: Arc<RetryScheduler>,
    ingress: mpsc::Sender<Arc<PushRequest>>,
}

impl PushService {
    /// Wire the dispatcher and scheduler to a fresh ingress channel and spawn
    /// the ingress and scheduler loops. Both stop on `shutdown`.
    pub fn start(
        config: DispatcherConfig,
        ingress_capacity: usize,
        registry: Arc<BackendRegistry>,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn EventSink>,
        shutdown: &broadcast::Sender<()>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (ingress, receiver) = mpsc::channel(ingress_capacity.max(1));
        let scheduler = Arc::new(RetryScheduler::new(ingress.clone()));
        let dispatcher = Arc::new(PushDispatcher::new(
            config,
            registry,
            store,
            events,
            scheduler.clone(),
        ));

        let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown.subscribe()));
        let ingress_handle = tokio::spawn(run_ingress(
            dispatcher.clone(),
            receiver,
            shutdown.subscribe(),
        ));

        tracing::info!(
            max_workers = config.max_workers,
            max_retries = config.retry.max_retries,
            initial_backoff_secs = config.retry.initial_backoff.as_secs(),
            "Push service started"
        );

        let service = Arc::new(Self {
            dispatcher,
            scheduler,
            ingress,
        });
        (service, vec![scheduler_handle, ingress_handle])
    }

    /// Queue a request for dispatch, returning its id.
    pub async fn submit(&self, request: PushRequest) -> Result<Uuid> {
        if request.service.trim().is_empty() {
            return Err(AppError::Validation("service must not be empty".to_string()));
        }
        if request.subscribers.is_empty() {
            return Err(AppError::Validation(
                "at least one subscriber is required".to_string(),
            ));
        }

        let id = request.id;
        self.ingress
            .send(Arc::new(request))
            .await
            .map_err(|_| AppError::Unavailable("push service is shutting down".to_string()))?;

        tracing::debug!(request_id = %id, "Push request queued");
        Ok(id)
    }

    pub fn dispatcher(&self) -> &Arc<PushDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }
}

/// Take requests off the ingress and process each on its own task. On
/// shutdown, in-flight requests are allowed to finish.
async fn run_ingress(
    dispatcher: Arc<PushDispatcher>,
    mut receiver: mpsc::Receiver<Arc<PushRequest>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut in_flight = JoinSet::new();
    tracing::info!("Ingress loop started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Ingress loop received shutdown signal");
                break;
            }
            request = receiver.recv() => {
                let Some(request) = request else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move { dispatcher.process(request).await });
            }
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Push request task panicked");
                }
            }
        }
    }

    let remaining = in_flight.len();
    if remaining > 0 {
        tracing::info!(remaining, "Waiting for in-flight push requests");
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Push request task panicked");
        }
    }

    tracing::info!("Ingress loop stopped");
}
