//! Push data model: requests, notifications, provider credentials and
//! delivery points.

mod types;

pub use types::{
    DeliveryPoint, Notification, ProviderDevicePair, PushRequest, PushRequestBuilder,
    PushServiceProvider, ServiceType, SERVICE_TYPE_COUNT,
};
