//! Shared application state passed to all handlers.

use std::sync::Arc;
use std::time::Instant;

use querydeck_sources::SourceRegistry;

use crate::config::AppConfig;
use crate::engine::{ExecutionEngine, StatusPublisher};
use crate::store::ExpressionStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Background executor
    pub engine: ExecutionEngine,

    /// Snapshot access for status polling
    pub status: StatusPublisher,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    /// Build the state around a store and a source registry.
    pub fn new(
        store: Arc<dyn ExpressionStore>,
        sources: Arc<SourceRegistry>,
        config: AppConfig,
    ) -> Self {
        let engine = ExecutionEngine::new(store, sources);
        Self {
            status: engine.publisher(),
            engine,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExpressionStore> {
        self.engine.store()
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        self.engine.sources()
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
