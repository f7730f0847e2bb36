//! Delivery event sink.
//!
//! Every successful delivery and every failure that is not retried produces
//! exactly one call on the sink. Retried attempts produce none until the
//! retry itself settles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeliveryFailure;
use crate::push::{DeliveryPoint, PushRequest};

/// Default capacity of the broadcast event channel
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Receiver for delivery outcomes
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_delivery_success(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: &DeliveryPoint,
        message_id: &str,
    );

    /// `delivery_point` is `None` when the subscriber could not be resolved
    async fn on_delivery_failure(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: Option<&DeliveryPoint>,
        error: &DeliveryFailure,
    );
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn on_delivery_success(&self, _: &PushRequest, _: &str, _: &DeliveryPoint, _: &str) {}

    async fn on_delivery_failure(
        &self,
        _: &PushRequest,
        _: &str,
        _: Option<&DeliveryPoint>,
        _: &DeliveryFailure,
    ) {
    }
}

/// Serialisable record of one delivery outcome
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Success {
        request_id: Uuid,
        service: String,
        subscriber: String,
        delivery_point: String,
        message_id: String,
        retry_count: u32,
        at: DateTime<Utc>,
    },
    Failure {
        request_id: Uuid,
        service: String,
        subscriber: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivery_point: Option<String>,
        error: String,
        retry_count: u32,
        at: DateTime<Utc>,
    },
}

/// Sink publishing [`DeliveryEvent`]s to any number of subscribers.
///
/// Events are dropped when nobody listens; slow listeners lag and skip.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DeliveryEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn on_delivery_success(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: &DeliveryPoint,
        message_id: &str,
    ) {
        let _ = self.sender.send(DeliveryEvent::Success {
            request_id: request.id,
            service: request.service.clone(),
            subscriber: subscriber.to_string(),
            delivery_point: delivery_point.name.clone(),
            message_id: message_id.to_string(),
            retry_count: request.retry_count,
            at: Utc::now(),
        });
    }

    async fn on_delivery_failure(
        &self,
        request: &PushRequest,
        subscriber: &str,
        delivery_point: Option<&DeliveryPoint>,
        error: &DeliveryFailure,
    ) {
        let _ = self.sender.send(DeliveryEvent::Failure {
            request_id: request.id,
            service: request.service.clone(),
            subscriber: subscriber.to_string(),
            delivery_point: delivery_point.map(|dp| dp.name.clone()),
            error: error.to_string(),
            retry_count: request.retry_count,
            at: Utc::now(),
        });
    }
}
