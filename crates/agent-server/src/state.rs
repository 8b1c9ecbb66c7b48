//! Application State

use std::sync::Arc;

use agent_core::Orchestrator;
use agent_tools::DocumentSource;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Orchestration loop with its provider, tools and session store
    pub orchestrator: Arc<Orchestrator>,

    /// Database the query tools read from, if any
    pub documents: Option<Arc<dyn DocumentSource>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, documents: Option<Arc<dyn DocumentSource>>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            documents,
        }
    }
}
