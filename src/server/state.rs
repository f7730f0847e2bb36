use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::service::PushService;
use crate::store::MemoryCredentialStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<PushService>,
    pub store: Arc<MemoryCredentialStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        service: Arc<PushService>,
        store: Arc<MemoryCredentialStore>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            service,
            store,
            started_at: Instant::now(),
        }
    }
}
