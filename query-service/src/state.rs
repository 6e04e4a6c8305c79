//! Application state for the query service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::driver::EngineDriver;
use crate::registry::ConnectionStore;
use crate::service::QueryResolutionService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<QueryResolutionService>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        driver: Arc<dyn EngineDriver>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        Self {
            service: Arc::new(QueryResolutionService::new(&config, driver, store)),
            config,
        }
    }
}
