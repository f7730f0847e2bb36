//! Credential store abstraction.
//!
//! The dispatcher reads provider/delivery point pairs through this trait and
//! writes refreshed credentials back through it. It never persists anything
//! itself.

mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::push::{DeliveryPoint, ProviderDevicePair, PushServiceProvider};

pub use memory::MemoryCredentialStore;

/// Storage for provider credentials and subscriber delivery points.
///
/// # Thread Safety
///
/// Implementations are called concurrently from many fan-out workers with no
/// locking on the caller's side.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All (provider, delivery point) pairs a subscriber of `service` resolves
    /// to. An empty list means nothing to deliver to.
    async fn resolve_pairs(
        &self,
        service: &str,
        subscriber: &str,
    ) -> Result<Vec<ProviderDevicePair>, StoreError>;

    /// Replace the stored provider with the same name
    async fn update_provider(&self, provider: &PushServiceProvider) -> Result<(), StoreError>;

    /// Replace the stored delivery point with the same name
    async fn update_delivery_point(&self, delivery_point: &DeliveryPoint) -> Result<(), StoreError>;
}
