//! Delivery backends and the per-service-type backend table.
//!
//! A backend speaks one push network's wire protocol. The dispatcher never
//! talks to a network directly; it looks the backend up by the provider's
//! service type and hands it the provider, the delivery point and the
//! notification.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PushError;
use crate::push::{DeliveryPoint, Notification, PushServiceProvider, ServiceType, SERVICE_TYPE_COUNT};

/// Delivery capability for one push network.
///
/// # Errors
///
/// Implementations signal stale credentials with [`PushError::Refresh`] and
/// transient failures with [`PushError::Retry`]. Any other error is treated
/// as permanent for that delivery point.
#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Deliver one notification, returning the network's message id.
    async fn push(
        &self,
        provider: &PushServiceProvider,
        delivery_point: &DeliveryPoint,
        notification: &Notification,
    ) -> Result<String, PushError>;
}

/// Backend for unregistered slots. Performs no I/O and always succeeds with
/// an empty message id.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

#[async_trait]
impl PushBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn push(
        &self,
        _provider: &PushServiceProvider,
        _delivery_point: &DeliveryPoint,
        _notification: &Notification,
    ) -> Result<String, PushError> {
        Ok(String::new())
    }
}

/// Fixed-size table mapping a service type to its backend.
///
/// Mutated only during setup; the dispatcher holds it behind an `Arc` and
/// only reads it.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn PushBackend>>,
}

impl BackendRegistry {
    /// Create a table with every slot holding a [`NullBackend`]
    pub fn new() -> Self {
        let null: Arc<dyn PushBackend> = Arc::new(NullBackend);
        Self {
            backends: vec![null; SERVICE_TYPE_COUNT],
        }
    }

    /// Install a backend for a service type
    pub fn register(&mut self, service_type: ServiceType, backend: Arc<dyn PushBackend>) {
        self.set(service_type.index() as i32, backend);
    }

    /// Install a backend by raw slot id. Out of range ids are ignored.
    pub fn set(&mut self, service_id: i32, backend: Arc<dyn PushBackend>) {
        let Some(slot) = usize::try_from(service_id)
            .ok()
            .and_then(|i| self.backends.get_mut(i))
        else {
            tracing::warn!(service_id, "Ignoring backend registration for unknown service type");
            return;
        };

        tracing::debug!(service_id, backend = backend.name(), "Registered push backend");
        *slot = backend;
    }

    /// Backend for a provider's declared service type, `None` when the
    /// provider's service id is invalid.
    pub fn get(&self, provider: &PushServiceProvider) -> Option<&Arc<dyn PushBackend>> {
        usize::try_from(provider.service_id)
            .ok()
            .and_then(|i| self.backends.get(i))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
