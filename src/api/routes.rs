use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;

use super::credentials::{add_provider, remove_provider, subscribe, unsubscribe};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::push::submit_push;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, Stats & Metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/push", post(submit_push))
                // Credentials
                .route("/providers", post(add_provider))
                .route("/providers/{service}/{name}", delete(remove_provider))
                .route("/subscriptions", post(subscribe))
                .route(
                    "/subscriptions/{service}/{subscriber}/{delivery_point}",
                    delete(unsubscribe),
                ),
        )
}
