//! Application state for the API server.

use roundtable_coordinator::{Coordinator, CoordinatorConfig};
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    /// Routing and orchestration for every chat request
    pub coordinator: Arc<Coordinator>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create application state backed by the configured model provider.
    pub fn new(config: CoordinatorConfig) -> roundtable_common::Result<Self> {
        Ok(Self::with_coordinator(Coordinator::from_config(config)?))
    }

    pub fn with_coordinator(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
