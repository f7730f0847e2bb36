//! Shared test doubles for the integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use push_dispatch_service::backend::{BackendRegistry, PushBackend};
use push_dispatch_service::dispatch::{DispatcherConfig, PushDispatcher};
use push_dispatch_service::error::{DeliveryFailure, PushError, StoreError};
use push_dispatch_service::events::EventSink;
use push_dispatch_service::push::{
    DeliveryPoint, Notification, ProviderDevicePair, PushRequest, PushServiceProvider, ServiceType,
};
use push_dispatch_service::scheduler::RetryScheduler;
use push_dispatch_service::store::{CredentialStore, MemoryCredentialStore};

pub const SERVICE: &str = "news";

/// Backend replaying scripted results, then repeating a fallback
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, PushError>>>,
    fallback: Result<String, PushError>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn always(result: Result<String, PushError>) -> Arc<Self> {
        Self::scripted(Vec::new(), result)
    }

    pub fn scripted(
        script: Vec<Result<String, PushError>>,
        fallback: Result<String, PushError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of the delivery points pushed to, in call order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn push(
        &self,
        _provider: &PushServiceProvider,
        delivery_point: &DeliveryPoint,
        _notification: &Notification,
    ) -> Result<String, PushError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(delivery_point.name.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Success {
        subscriber: String,
        delivery_point: String,
        message_id: String,
        retry_count: u32,
    },
    Failure {
        subscriber: String,
        delivery_point: Option<String>,
        error: DeliveryFailure,
    },
}

/// Event sink keeping every call in order
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Recorded::Success { .. }))
            .collect()
    }

    pub fn failures(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Recorded::Failure { .. }))
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn on_delivery_success(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: &DeliveryPoint,
        message_id: &str,
    ) {
        self.events.lock().unwrap().push(Recorded::Success {
            subscriber: subscriber.to_string(),
            delivery_point: delivery_point.name.clone(),
            message_id: message_id.to_string(),
            retry_count: request.retry_count,
        });
    }

    async fn on_delivery_failure(
        &self,
        _request: &PushRequest,
        subscriber: &str,
        delivery_point: Option<&DeliveryPoint>,
        error: &DeliveryFailure,
    ) {
        self.events.lock().unwrap().push(Recorded::Failure {
            subscriber: subscriber.to_string(),
            delivery_point: delivery_point.map(|dp| dp.name.clone()),
            error: error.clone(),
        });
    }
}

/// Memory store wrapper counting calls, with per-subscriber lookup failures
/// and optional extra pairs appended to every resolution.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryCredentialStore,
    failing: Mutex<HashSet<String>>,
    extra_pairs: Mutex<Vec<ProviderDevicePair>>,
    resolves: AtomicUsize,
    provider_updates: AtomicUsize,
    delivery_point_updates: AtomicUsize,
}

impl CountingStore {
    pub fn fail_for(&self, subscriber: &str) {
        self.failing.lock().unwrap().insert(subscriber.to_string());
    }

    pub fn append_pair(&self, pair: ProviderDevicePair) {
        self.extra_pairs.lock().unwrap().push(pair);
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn provider_updates(&self) -> usize {
        self.provider_updates.load(Ordering::SeqCst)
    }

    pub fn delivery_point_updates(&self) -> usize {
        self.delivery_point_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn resolve_pairs(
        &self,
        service: &str,
        subscriber: &str,
    ) -> Result<Vec<ProviderDevicePair>, StoreError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(subscriber) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        let mut pairs = self.inner.resolve_pairs(service, subscriber).await?;
        pairs.extend(self.extra_pairs.lock().unwrap().iter().cloned());
        Ok(pairs)
    }

    async fn update_provider(&self, provider: &PushServiceProvider) -> Result<(), StoreError> {
        self.provider_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_provider(provider).await
    }

    async fn update_delivery_point(&self, delivery_point: &DeliveryPoint) -> Result<(), StoreError> {
        self.delivery_point_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_delivery_point(delivery_point).await
    }
}

/// Store with an FCM provider `app` under [`SERVICE`] and one FCM delivery
/// point per subscriber, named `<subscriber>-phone`.
pub fn store_with_subscribers(subscribers: &[&str]) -> Arc<CountingStore> {
    let store = CountingStore::default();
    store
        .inner
        .add_provider(SERVICE, PushServiceProvider::new("app", ServiceType::Fcm))
        .unwrap();
    for subscriber in subscribers {
        let dp = DeliveryPoint::new(format!("{}-phone", subscriber), ServiceType::Fcm)
            .with_data("regid", format!("reg-{}", subscriber));
        store.inner.subscribe(SERVICE, subscriber, dp).unwrap();
    }
    Arc::new(store)
}

pub struct Harness {
    pub dispatcher: Arc<PushDispatcher>,
    pub scheduler: Arc<RetryScheduler>,
    pub ingress: mpsc::Receiver<Arc<PushRequest>>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<CountingStore>,
}

/// Dispatcher with `backend` in the FCM slot. Fired retries land in
/// `ingress` instead of being processed.
pub fn harness(
    config: DispatcherConfig,
    backend: Arc<ScriptedBackend>,
    store: Arc<CountingStore>,
) -> Harness {
    let mut registry = BackendRegistry::new();
    registry.register(ServiceType::Fcm, backend);

    let (tx, ingress) = mpsc::channel(64);
    let scheduler = Arc::new(RetryScheduler::new(tx));
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Arc::new(PushDispatcher::new(
        config,
        Arc::new(registry),
        store.clone(),
        sink.clone(),
        scheduler.clone(),
    ));

    Harness {
        dispatcher,
        scheduler,
        ingress,
        sink,
        store,
    }
}

pub fn request(subscribers: &[&str]) -> Arc<PushRequest> {
    Arc::new(PushRequest::new(
        SERVICE,
        subscribers.iter().map(|s| s.to_string()).collect(),
        Notification::new().with("msg", "hello"),
    ))
}
