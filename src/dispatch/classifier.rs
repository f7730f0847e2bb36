//! Classification of backend results into dispatch dispositions.

use std::time::Duration;

use crate::error::PushError;
use crate::push::{DeliveryPoint, PushServiceProvider};

/// What the dispatcher should do with one delivery attempt's result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition<'a> {
    /// Delivered, with the network's message id
    Success(&'a str),
    /// Write back whichever credential is present, then handle `residual`
    /// (or count the attempt as delivered when there is none).
    CredentialRefresh {
        message_id: Option<&'a str>,
        provider: Option<&'a PushServiceProvider>,
        delivery_point: Option<&'a DeliveryPoint>,
        residual: Option<&'a PushError>,
    },
    /// Schedule a retry no sooner than this
    RetryAfter(Duration),
    /// Report and move on
    PermanentFailure(&'a PushError),
}

/// Classify a backend result. Pure: the same input always yields the same
/// disposition.
///
/// The refresh shape is checked first so that a refresh carrying a retry
/// residual still ends up retried.
pub fn classify(result: &Result<String, PushError>) -> Disposition<'_> {
    match result {
        Ok(id) => Disposition::Success(id),
        Err(PushError::Refresh {
            message_id,
            provider,
            delivery_point,
            residual,
        }) => Disposition::CredentialRefresh {
            message_id: message_id.as_deref(),
            provider: provider.as_ref(),
            delivery_point: delivery_point.as_ref(),
            residual: residual.as_deref(),
        },
        Err(err) => classify_residual(err),
    }
}

/// Classify an error left over after credentials were refreshed.
///
/// Only the retry shape is honoured here; everything else, including a
/// nested refresh, is permanent.
pub fn classify_residual(err: &PushError) -> Disposition<'_> {
    match err {
        PushError::Retry { retry_after, .. } => Disposition::RetryAfter(*retry_after),
        other => Disposition::PermanentFailure(other),
    }
}
