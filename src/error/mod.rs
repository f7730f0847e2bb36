use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::push::{DeliveryPoint, PushServiceProvider};

/// Errors a push backend reports for one delivery attempt.
///
/// `Refresh` and `Retry` are the two shapes the dispatcher acts on; anything
/// else is a permanent failure for that delivery point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    /// Stored credentials are stale. Whichever of provider / delivery point is
    /// present must be written back; `residual` is what is left to handle.
    /// Without a residual the push went through and `message_id` is its id.
    #[error("credentials need refresh{}", .residual.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    Refresh {
        message_id: Option<String>,
        provider: Option<PushServiceProvider>,
        delivery_point: Option<DeliveryPoint>,
        residual: Option<Box<PushError>>,
    },

    /// Transient failure, the network asks to try again after `retry_after`.
    #[error("retry after {}s: {reason}", .retry_after.as_secs())]
    Retry { retry_after: Duration, reason: String },

    #[error("invalid delivery point: {0}")]
    InvalidDeliveryPoint(String),

    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl PushError {
    pub fn retry(retry_after: Duration, reason: impl Into<String>) -> Self {
        PushError::Retry {
            retry_after,
            reason: reason.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        PushError::Backend(msg.into())
    }

    /// A refresh carrying only an updated delivery point
    pub fn refresh_delivery_point(delivery_point: DeliveryPoint) -> Self {
        PushError::Refresh {
            message_id: None,
            provider: None,
            delivery_point: Some(delivery_point),
            residual: None,
        }
    }

    /// A refresh carrying only an updated provider
    pub fn refresh_provider(provider: PushServiceProvider) -> Self {
        PushError::Refresh {
            message_id: None,
            provider: Some(provider),
            delivery_point: None,
            residual: None,
        }
    }

    /// Attach a residual error to a refresh. No-op on other shapes.
    pub fn with_residual(self, err: PushError) -> Self {
        match self {
            PushError::Refresh {
                message_id,
                provider,
                delivery_point,
                ..
            } => PushError::Refresh {
                message_id,
                provider,
                delivery_point,
                residual: Some(Box::new(err)),
            },
            other => other,
        }
    }

    /// Attach the message id of a push that went through despite the refresh.
    /// No-op on other shapes.
    pub fn with_message_id(self, id: impl Into<String>) -> Self {
        match self {
            PushError::Refresh {
                provider,
                delivery_point,
                residual,
                ..
            } => PushError::Refresh {
                message_id: Some(id.into()),
                provider,
                delivery_point,
                residual,
            },
            other => other,
        }
    }
}

/// Credential store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{0}")]
    Conflict(String),
}

/// Why a subscriber or delivery point could not be reached, as reported to
/// the event sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryFailure {
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Push(#[from] PushError),
}

impl DeliveryFailure {
    /// Metric label for this failure
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryFailure::Store(_) => "store",
            DeliveryFailure::Push(_) => "backend",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => AppError::Validation(msg),
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Unavailable(msg) => {
                let client_msg = if is_production() {
                    "Service temporarily unavailable".to_string()
                } else {
                    msg.clone()
                };
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", client_msg, msg.clone())
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::ServiceType;

    #[test]
    fn test_refresh_display_includes_residual() {
        let err = PushError::refresh_delivery_point(DeliveryPoint::new("dp", ServiceType::Fcm))
            .with_residual(PushError::backend("quota"));
        assert_eq!(err.to_string(), "credentials need refresh: backend error: quota");

        let bare = PushError::refresh_provider(PushServiceProvider::new("p", ServiceType::Fcm));
        assert_eq!(bare.to_string(), "credentials need refresh");
    }

    #[test]
    fn test_with_residual_ignores_non_refresh() {
        let err = PushError::backend("x").with_residual(PushError::backend("y"));
        assert_eq!(err, PushError::backend("x"));
    }

    #[test]
    fn test_store_error_maps_to_app_error() {
        let err: AppError = StoreError::NotFound {
            kind: "provider",
            name: "p".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_delivery_failure_reason() {
        let store: DeliveryFailure = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(store.reason(), "store");
        let push: DeliveryFailure = PushError::backend("boom").into();
        assert_eq!(push.reason(), "backend");
        assert_eq!(push.to_string(), "backend error: boom");
    }
}
