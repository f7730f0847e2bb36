//! In-memory credential store using DashMap.
//!
//! State is lost on restart. Services own providers, at most one per push
//! network; subscribers own delivery points. A delivery point resolves to the
//! provider of its service that targets the same network.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::push::{DeliveryPoint, ProviderDevicePair, PushServiceProvider};

use super::CredentialStore;

#[derive(Debug, Clone)]
struct ProviderEntry {
    service: String,
    provider: Arc<PushServiceProvider>,
}

/// In-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    /// provider name -> owning service and credential
    providers: DashMap<String, ProviderEntry>,
    /// service -> provider names
    services: DashMap<String, Vec<String>>,
    /// delivery point name -> delivery point
    delivery_points: DashMap<String, Arc<DeliveryPoint>>,
    /// (service, subscriber) -> delivery point names
    subscriptions: DashMap<(String, String), Vec<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a service.
    ///
    /// Fails if the provider's service type is invalid, if the name is taken
    /// by another service, or if the service already has a provider for the
    /// same network.
    pub fn add_provider(
        &self,
        service: &str,
        provider: PushServiceProvider,
    ) -> Result<(), StoreError> {
        let Some(service_type) = provider.service_type() else {
            return Err(StoreError::Conflict(format!(
                "provider {} has unknown service type {}",
                provider.name, provider.service_id
            )));
        };

        if let Some(existing) = self.providers.get(&provider.name) {
            if existing.service != service {
                return Err(StoreError::Conflict(format!(
                    "provider {} already belongs to service {}",
                    provider.name, existing.service
                )));
            }
        }

        let mut names = self.services.entry(service.to_string()).or_default();
        let clash = names.iter().any(|name| {
            name != &provider.name
                && self
                    .providers
                    .get(name)
                    .is_some_and(|e| e.provider.service_type() == Some(service_type))
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "service {} already has a {} provider",
                service, service_type
            )));
        }

        if !names.contains(&provider.name) {
            names.push(provider.name.clone());
        }

        tracing::debug!(
            service = %service,
            provider = %provider.name,
            service_type = %service_type,
            "Provider added"
        );

        self.providers.insert(
            provider.name.clone(),
            ProviderEntry {
                service: service.to_string(),
                provider: Arc::new(provider),
            },
        );
        Ok(())
    }

    /// Remove a provider from a service
    pub fn remove_provider(&self, service: &str, name: &str) -> Result<(), StoreError> {
        let removed = self
            .providers
            .remove_if(name, |_, entry| entry.service == service);
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind: "provider",
                name: name.to_string(),
            });
        }

        let now_empty = match self.services.get_mut(service) {
            Some(mut names) => {
                names.retain(|n| n != name);
                names.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.services.remove(service);
        }

        tracing::debug!(service = %service, provider = %name, "Provider removed");
        Ok(())
    }

    /// Subscribe a delivery point for a subscriber of `service`.
    ///
    /// The service must already have a provider for the delivery point's
    /// network. An existing delivery point with the same name is replaced.
    pub fn subscribe(
        &self,
        service: &str,
        subscriber: &str,
        delivery_point: DeliveryPoint,
    ) -> Result<(), StoreError> {
        if self.provider_for(service, &delivery_point)?.is_none() {
            return Err(StoreError::Conflict(format!(
                "service {} has no {} provider",
                service, delivery_point.service_type
            )));
        }

        let name = delivery_point.name.clone();
        self.delivery_points
            .insert(name.clone(), Arc::new(delivery_point));

        let mut names = self
            .subscriptions
            .entry((service.to_string(), subscriber.to_string()))
            .or_default();
        if !names.contains(&name) {
            names.push(name.clone());
        }

        tracing::debug!(
            service = %service,
            subscriber = %subscriber,
            delivery_point = %name,
            "Subscribed"
        );
        Ok(())
    }

    /// Remove one delivery point from a subscriber
    pub fn unsubscribe(
        &self,
        service: &str,
        subscriber: &str,
        delivery_point: &str,
    ) -> Result<(), StoreError> {
        let key = (service.to_string(), subscriber.to_string());
        let (found, now_empty) = match self.subscriptions.get_mut(&key) {
            Some(mut names) => {
                let before = names.len();
                names.retain(|n| n != delivery_point);
                (names.len() != before, names.is_empty())
            }
            None => (false, false),
        };

        if !found {
            return Err(StoreError::NotFound {
                kind: "subscription",
                name: format!("{}/{}/{}", service, subscriber, delivery_point),
            });
        }
        if now_empty {
            self.subscriptions.remove(&key);
        }

        tracing::debug!(
            service = %service,
            subscriber = %subscriber,
            delivery_point = %delivery_point,
            "Unsubscribed"
        );
        Ok(())
    }

    /// Current copy of a provider
    pub fn provider(&self, name: &str) -> Option<Arc<PushServiceProvider>> {
        self.providers.get(name).map(|e| e.provider.clone())
    }

    /// Current copy of a delivery point
    pub fn delivery_point(&self, name: &str) -> Option<Arc<DeliveryPoint>> {
        self.delivery_points.get(name).map(|dp| dp.clone())
    }

    /// Number of subscriptions across all services
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn provider_for(
        &self,
        service: &str,
        delivery_point: &DeliveryPoint,
    ) -> Result<Option<Arc<PushServiceProvider>>, StoreError> {
        let names = self.services.get(service).ok_or_else(|| StoreError::NotFound {
            kind: "service",
            name: service.to_string(),
        })?;

        Ok(names.iter().find_map(|name| {
            self.providers
                .get(name)
                .filter(|e| e.provider.service_type() == Some(delivery_point.service_type))
                .map(|e| e.provider.clone())
        }))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn resolve_pairs(
        &self,
        service: &str,
        subscriber: &str,
    ) -> Result<Vec<ProviderDevicePair>, StoreError> {
        let key = (service.to_string(), subscriber.to_string());
        let names = match self.subscriptions.get(&key) {
            Some(names) => names.clone(),
            None => return Ok(Vec::new()),
        };

        let mut pairs = Vec::with_capacity(names.len());
        for name in names {
            let Some(dp) = self.delivery_point(&name) else {
                continue;
            };
            match self.provider_for(service, &dp)? {
                Some(provider) => pairs.push(ProviderDevicePair::new(provider, dp)),
                None => {
                    tracing::debug!(
                        service = %service,
                        subscriber = %subscriber,
                        delivery_point = %dp.name,
                        "No provider for delivery point, skipping"
                    );
                }
            }
        }

        Ok(pairs)
    }

    async fn update_provider(&self, provider: &PushServiceProvider) -> Result<(), StoreError> {
        let mut entry = self
            .providers
            .get_mut(&provider.name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "provider",
                name: provider.name.clone(),
            })?;
        entry.provider = Arc::new(provider.clone());
        Ok(())
    }

    async fn update_delivery_point(&self, delivery_point: &DeliveryPoint) -> Result<(), StoreError> {
        let mut entry = self
            .delivery_points
            .get_mut(&delivery_point.name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "delivery point",
                name: delivery_point.name.clone(),
            })?;
        *entry = Arc::new(delivery_point.clone());
        Ok(())
    }
}
