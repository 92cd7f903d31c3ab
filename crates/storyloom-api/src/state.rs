//! Shared application state.

use std::sync::Arc;

use storyloom_core::clock::Clock;
use storyloom_core::repository::Store;
use storyloom_orchestration::application::creation::ProjectCreationStateMachine;
use storyloom_orchestration::application::orchestrator::{Capabilities, GenerationOrchestrator};
use storyloom_orchestration::config::OrchestratorConfig;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relational store, used directly by read-only artifact queries.
    pub store: Arc<dyn Store>,
    /// Generation pipeline.
    pub orchestrator: GenerationOrchestrator,
    /// Project creation dialogue.
    pub creation: ProjectCreationStateMachine,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        capabilities: Capabilities,
        config: OrchestratorConfig,
    ) -> Self {
        let creation = ProjectCreationStateMachine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&capabilities.generator),
        )
        .with_config(config);
        let orchestrator = GenerationOrchestrator::new(Arc::clone(&store), clock, capabilities)
            .with_config(config);
        Self {
            store,
            orchestrator,
            creation,
        }
    }
}
