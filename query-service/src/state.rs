//! Application state for query service.

use std::sync::Arc;

use common::config::AppConfig;
use query_engine::QueryEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    /// Wires the production engine from configuration.
    pub fn new(config: AppConfig) -> Self {
        let engine = Arc::new(QueryEngine::from_config(&config));
        Self { config, engine }
    }

    /// Service name stamped on response metadata.
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}
