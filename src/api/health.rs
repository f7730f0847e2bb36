//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::dispatch::DispatcherStatsSnapshot;
use crate::scheduler::SchedulerStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatcher: DispatcherStatsSnapshot,
    pub scheduler: SchedulerStatsSnapshot,
    pub credentials: CredentialStats,
}

#[derive(Debug, Serialize)]
pub struct CredentialStats {
    pub providers: usize,
    pub subscriptions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        dispatcher: state.service.dispatcher().stats(),
        scheduler: state.service.scheduler().stats(),
        credentials: CredentialStats {
            providers: state.store.provider_count(),
            subscriptions: state.store.subscription_count(),
        },
    })
}
