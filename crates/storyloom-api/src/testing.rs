//! Route test helpers: an in-memory app with one seeded tenant, project,
//! and conversation session.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use serde_json::Value;
use storyloom_core::model::{ArtifactType, CreationStage};
use storyloom_orchestration::application::orchestrator::Capabilities;
use storyloom_orchestration::config::OrchestratorConfig;
use storyloom_test_support::{
    FailingStore, FixedClock, InMemoryStore, MemoryCache, RecordingIndexer, ScriptedGenerator,
    StaticConflictScanner, conversation_session, creation_session, project, tenant,
};
use uuid::Uuid;

use crate::extract::TENANT_HEADER;
use crate::state::AppState;

/// Ids of the seeded rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Seeded {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub creation_session_id: Uuid,
}

fn capabilities(generator: ScriptedGenerator) -> Capabilities {
    Capabilities {
        generator: Arc::new(generator),
        scanner: Arc::new(StaticConflictScanner::default()),
        indexer: Arc::new(RecordingIndexer::default()),
        cache: Arc::new(MemoryCache::new()),
    }
}

pub(crate) async fn seeded() -> (InMemoryStore, AppState, Seeded) {
    seeded_with(ScriptedGenerator::new()).await
}

pub(crate) async fn seeded_with(generator: ScriptedGenerator) -> (InMemoryStore, AppState, Seeded) {
    let store = InMemoryStore::new();
    let tenant = tenant(0);
    let project = project(tenant.id);
    let session = conversation_session(&project, ArtifactType::Worldview);
    let creation = creation_session(tenant.id, CreationStage::Confirm);
    let seeded = Seeded {
        tenant_id: tenant.id,
        project_id: project.id,
        session_id: session.id,
        creation_session_id: creation.id,
    };
    store
        .seed(|s| {
            s.tenants.insert(tenant.id, tenant);
            s.projects.insert(project.id, project);
            s.sessions.insert(session.id, session);
            s.creation_sessions.insert(creation.id, creation);
        })
        .await;

    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::default()),
        capabilities(generator),
        OrchestratorConfig::default(),
    );
    (store, state, seeded)
}

pub(crate) fn failing_state() -> AppState {
    AppState::new(
        Arc::new(FailingStore),
        Arc::new(FixedClock::default()),
        capabilities(ScriptedGenerator::new()),
        OrchestratorConfig::default(),
    )
}

pub(crate) fn json_request(method: &str, uri: &str, tenant_id: Uuid, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(TENANT_HEADER, tenant_id.to_string())
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub(crate) fn get_request(uri: &str, tenant_id: Uuid) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(TENANT_HEADER, tenant_id.to_string())
        .body(Body::empty())
        .unwrap()
}

pub(crate) async fn body_json(response: Response) -> Value {
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body_bytes).unwrap()
}
