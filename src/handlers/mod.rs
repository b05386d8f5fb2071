//! HTTP request handlers for the pganalytics scrape API

use crate::config::Config;
use crate::registry::TenantRegistry;
use crate::snapshot::SnapshotStore;
use std::sync::Arc;

pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// Contains configuration, the snapshot store and the tenant registry.
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SnapshotStore>,
    registry: Arc<TenantRegistry>,
}

impl AppState {
    /// Create a new AppState from its shared components
    pub fn new(
        config: Arc<Config>,
        store: Arc<SnapshotStore>,
        registry: Arc<TenantRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    /// Get reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get reference to the snapshot store
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Get reference to the tenant registry
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }
}
