//! Shared application state for the HTTP surface

use std::sync::Arc;

use modeld_core::Settings;
use modeld_manager::InstanceManager;

use crate::metrics::Metrics;
use crate::shutdown::ShutdownCoordinator;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Instance manager - source of truth for all live model instances
    pub manager: Arc<InstanceManager>,
    /// Prometheus collectors for the HTTP surface
    pub metrics: Arc<Metrics>,
    /// Root cancellation and drain state
    pub shutdown: ShutdownCoordinator,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        manager: Arc<InstanceManager>,
        metrics: Arc<Metrics>,
        shutdown: ShutdownCoordinator,
        settings: Settings,
    ) -> Self {
        Self {
            manager,
            metrics,
            shutdown,
            settings: Arc::new(settings),
        }
    }
}
