//! Request and response models for the HTTP API

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::push::{DeliveryPoint, Notification, ServiceType};

/// Request to push a notification to subscribers of a service
#[derive(Debug, Deserialize)]
pub struct SubmitPushRequest {
    pub service: String,
    pub subscribers: Vec<String>,
    #[serde(default)]
    pub notification: Notification,
}

/// Response for an accepted push
#[derive(Debug, Serialize, Deserialize)]
pub struct PushAccepted {
    pub request_id: Uuid,
    pub subscribers: usize,
    pub accepted_at: DateTime<Utc>,
}

/// Request to register a provider credential under a service
#[derive(Debug, Deserialize)]
pub struct AddProviderRequest {
    pub service: String,
    pub name: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub fixed_data: HashMap<String, String>,
    #[serde(default)]
    pub volatile_data: HashMap<String, String>,
}

/// Request to subscribe a delivery point for a subscriber
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub service: String,
    pub subscriber: String,
    pub delivery_point: DeliveryPoint,
}
