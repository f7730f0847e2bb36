use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of slots in the backend table.
pub const SERVICE_TYPE_COUNT: usize = 5;

/// Push networks a provider or delivery point can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    C2dm,
    Apns,
    Fcm,
    Adm,
    Mpns,
}

impl ServiceType {
    /// Slot of this service type in the backend table.
    pub fn index(self) -> usize {
        match self {
            ServiceType::C2dm => 0,
            ServiceType::Apns => 1,
            ServiceType::Fcm => 2,
            ServiceType::Adm => 3,
            ServiceType::Mpns => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ServiceType::C2dm),
            1 => Some(ServiceType::Apns),
            2 => Some(ServiceType::Fcm),
            3 => Some(ServiceType::Adm),
            4 => Some(ServiceType::Mpns),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::C2dm => "c2dm",
            ServiceType::Apns => "apns",
            ServiceType::Fcm => "fcm",
            ServiceType::Adm => "adm",
            ServiceType::Mpns => "mpns",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification payload, a flat string map handed to the backend untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notification {
    pub data: HashMap<String, String>,
}

impl Notification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A provider credential: one application's registration with a push network.
///
/// `service_id` is the raw slot id as stored by the credential store. It is
/// kept raw so that a corrupt or unknown id can be carried around and simply
/// skipped at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushServiceProvider {
    pub name: String,
    pub service_id: i32,
    /// Data fixed at registration (sender id, app key, ...)
    #[serde(default)]
    pub fixed_data: HashMap<String, String>,
    /// Data a backend may rewrite through a refresh (auth tokens, ...)
    #[serde(default)]
    pub volatile_data: HashMap<String, String>,
}

impl PushServiceProvider {
    pub fn new(name: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            service_id: service_type.index() as i32,
            fixed_data: HashMap::new(),
            volatile_data: HashMap::new(),
        }
    }

    /// Service type declared by this provider, `None` if the id is out of range.
    pub fn service_type(&self) -> Option<ServiceType> {
        usize::try_from(self.service_id)
            .ok()
            .and_then(ServiceType::from_index)
    }

    pub fn valid_service_type(&self) -> bool {
        self.service_type().is_some()
    }
}

/// A device endpoint: one subscriber installation within a push network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPoint {
    pub name: String,
    pub service_type: ServiceType,
    /// Network specific addressing (registration id, device token, ...)
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl DeliveryPoint {
    pub fn new(name: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            service_type,
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A resolved (provider, delivery point) target for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDevicePair {
    pub provider: Arc<PushServiceProvider>,
    pub delivery_point: Arc<DeliveryPoint>,
}

impl ProviderDevicePair {
    pub fn new(provider: Arc<PushServiceProvider>, delivery_point: Arc<DeliveryPoint>) -> Self {
        Self {
            provider,
            delivery_point,
        }
    }
}

/// One unit of work: deliver a notification to a list of subscribers.
///
/// Retries are new requests linked to the attempt that spawned them through
/// `previous`. Only the immediate predecessor is ever read.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub id: Uuid,
    pub service: String,
    pub notification: Arc<Notification>,
    pub subscribers: Vec<String>,
    pub provider: Option<Arc<PushServiceProvider>>,
    pub delivery_point: Option<Arc<DeliveryPoint>>,
    pub retry_count: u32,
    /// Zero means unset
    pub backoff: Duration,
    pub previous: Option<Arc<PushRequest>>,
    pub punched_at: DateTime<Utc>,
}

impl PushRequest {
    /// Create a fresh request with no retry history
    pub fn new(
        service: impl Into<String>,
        subscribers: Vec<String>,
        notification: Notification,
    ) -> Self {
        PushRequestBuilder::new(service, notification)
            .subscribers(subscribers)
            .build()
    }

    pub fn builder(service: impl Into<String>, notification: Notification) -> PushRequestBuilder {
        PushRequestBuilder::new(service, notification)
    }

    /// The pre-resolved target, if both halves are attached
    pub fn target(&self) -> Option<ProviderDevicePair> {
        match (&self.provider, &self.delivery_point) {
            (Some(provider), Some(dp)) => Some(ProviderDevicePair::new(provider.clone(), dp.clone())),
            _ => None,
        }
    }

    /// A request that can skip the credential store entirely.
    pub fn is_single_delivery_point(&self) -> bool {
        self.subscribers.len() == 1 && self.provider.is_some() && self.delivery_point.is_some()
    }
}

/// Builder for push requests
#[derive(Debug, Clone)]
pub struct PushRequestBuilder {
    id: Option<Uuid>,
    service: String,
    notification: Notification,
    subscribers: Vec<String>,
    target: Option<ProviderDevicePair>,
}

impl PushRequestBuilder {
    pub fn new(service: impl Into<String>, notification: Notification) -> Self {
        Self {
            id: None,
            service: service.into(),
            notification,
            subscribers: Vec::new(),
            target: None,
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscribers.push(subscriber.into());
        self
    }

    pub fn subscribers(mut self, subscribers: Vec<String>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Pre-attach a resolved provider/delivery point pair
    pub fn target(mut self, pair: ProviderDevicePair) -> Self {
        self.target = Some(pair);
        self
    }

    pub fn build(self) -> PushRequest {
        let (provider, delivery_point) = match self.target {
            Some(pair) => (Some(pair.provider), Some(pair.delivery_point)),
            None => (None, None),
        };

        PushRequest {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            service: self.service,
            notification: Arc::new(self.notification),
            subscribers: self.subscribers,
            provider,
            delivery_point,
            retry_count: 0,
            backoff: Duration::ZERO,
            previous: None,
            punched_at: Utc::now(),
        }
    }
}
