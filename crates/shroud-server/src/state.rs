//! Shared application state for the Shroud server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::time::Instant;

use shroud_core::LifecycleCoordinator;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Creates, reveals and manages secrets.
    pub coordinator: LifecycleCoordinator,
    /// Storage backend name, reported by the health endpoint.
    pub storage: &'static str,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator, storage: &'static str) -> Self {
        Self {
            coordinator,
            storage,
            started_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
