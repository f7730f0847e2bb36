//! API layer - HTTP endpoint handlers organized by domain.

mod credentials;
mod health;
mod metrics;
mod models;
mod push;
mod routes;

pub use credentials::{add_provider, remove_provider, subscribe, unsubscribe};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use models::{
    AddProviderRequest, PushAccepted, SubscribeRequest, SubmitPushRequest,
};
pub use push::submit_push;
pub use routes::api_routes;
