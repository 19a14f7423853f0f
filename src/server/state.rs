use crate::config::AppConfig;
use crate::store::{Store, StoreHandle};
use std::sync::Arc;

/// Shared by every connection task.
pub struct AppState {
    pub config: AppConfig,
    pub store: StoreHandle,
}

impl AppState {
    /// Store opens lazily on the first request that needs it.
    pub fn new(config: AppConfig) -> Self {
        let store = StoreHandle::new(config.store.clone());
        Self { config, store }
    }

    pub fn with_store(config: AppConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store: StoreHandle::from_store(store),
        }
    }
}
