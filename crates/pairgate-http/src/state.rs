//! Shared state for the HTTP server.

use pairgate_core::orchestrator::Orchestrator;
use pairgate_core::session::SessionRegistry;
use std::sync::Arc;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.orchestrator.registry()
    }
}
