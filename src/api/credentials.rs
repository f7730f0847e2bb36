//! Provider and subscription management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{AppError, Result};
use crate::push::PushServiceProvider;
use crate::server::AppState;

use super::models::{AddProviderRequest, SubscribeRequest};

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// POST /api/v1/providers
pub async fn add_provider(
    State(state): State<AppState>,
    Json(request): Json<AddProviderRequest>,
) -> Result<StatusCode> {
    require(&request.service, "service")?;
    require(&request.name, "name")?;

    let mut provider = PushServiceProvider::new(request.name, request.service_type);
    provider.fixed_data = request.fixed_data;
    provider.volatile_data = request.volatile_data;

    state.store.add_provider(&request.service, provider)?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/providers/{service}/{name}
pub async fn remove_provider(
    State(state): State<AppState>,
    Path((service, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.store.remove_provider(&service, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/subscriptions
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<StatusCode> {
    require(&request.service, "service")?;
    require(&request.subscriber, "subscriber")?;
    require(&request.delivery_point.name, "delivery_point.name")?;

    state
        .store
        .subscribe(&request.service, &request.subscriber, request.delivery_point)?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/subscriptions/{service}/{subscriber}/{delivery_point}
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((service, subscriber, delivery_point)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    state.store.unsubscribe(&service, &subscriber, &delivery_point)?;
    Ok(StatusCode::NO_CONTENT)
}
