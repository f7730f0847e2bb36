//! Push submission handler

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

use crate::error::Result;
use crate::push::PushRequest;
use crate::server::AppState;

use super::models::{PushAccepted, SubmitPushRequest};

/// POST /api/v1/push - queue a push for dispatch
pub async fn submit_push(
    State(state): State<AppState>,
    Json(request): Json<SubmitPushRequest>,
) -> Result<(StatusCode, Json<PushAccepted>)> {
    let subscribers = request.subscribers.len();
    tracing::debug!(service = %request.service, subscribers, "Push submitted over HTTP");
    let push = PushRequest::new(request.service, request.subscribers, request.notification);
    let request_id = state.service.submit(push).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PushAccepted {
            request_id,
            subscribers,
            accepted_at: Utc::now(),
        }),
    ))
}
