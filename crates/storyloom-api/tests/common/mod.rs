//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use storyloom_core::model::ArtifactType;
use storyloom_core::repository::Store;
use storyloom_orchestration::application::orchestrator::Capabilities;
use storyloom_orchestration::config::OrchestratorConfig;
use storyloom_store::pg_store::PgStore;
use storyloom_test_support::{
    FixedClock, MemoryCache, RecordingIndexer, ScriptedGenerator, StaticConflictScanner,
    conversation_session, project, tenant,
};
use tower::ServiceExt;
use uuid::Uuid;

use storyloom_api::extract::TENANT_HEADER;
use storyloom_api::state::AppState;

/// Ids of the rows created by [`seed`].
#[derive(Debug, Clone, Copy)]
pub struct Seeded {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub session_id: Uuid,
}

/// Build the full app router over a real `PgStore`, a fixed clock, and a
/// scripted generator. Uses the same route structure as `main.rs`.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with(pool, ScriptedGenerator::new())
}

pub fn build_test_app_with(pool: PgPool, generator: ScriptedGenerator) -> Router {
    let capabilities = Capabilities {
        generator: Arc::new(generator),
        scanner: Arc::new(StaticConflictScanner::default()),
        indexer: Arc::new(RecordingIndexer::default()),
        cache: Arc::new(MemoryCache::new()),
    };
    let app_state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(FixedClock::default()),
        capabilities,
        OrchestratorConfig::default(),
    );
    storyloom_api::app(app_state)
}

/// Insert a tenant with `daily_token_quota`, one project, and one worldview
/// conversation session.
pub async fn seed(pool: &PgPool, daily_token_quota: i64) -> Seeded {
    let tenant = tenant(daily_token_quota);
    sqlx::query(
        "INSERT INTO tenants (id, name, token_balance, daily_token_quota) VALUES ($1, $2, $3, $4)",
    )
    .bind(tenant.id)
    .bind(&tenant.name)
    .bind(tenant.token_balance)
    .bind(tenant.daily_token_quota)
    .execute(pool)
    .await
    .unwrap();

    let project = project(tenant.id);
    let session = conversation_session(&project, ArtifactType::Worldview);
    let store = PgStore::new(pool.clone());
    let mut tx = store.begin().await.unwrap();
    tx.insert_project(&project).await.unwrap();
    tx.insert_session(&session).await.unwrap();
    tx.commit().await.unwrap();

    Seeded {
        tenant_id: tenant.id,
        project_id: project.id,
        session_id: session.id,
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body as `tenant_id` and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    tenant_id: Uuid,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(TENANT_HEADER, tenant_id.to_string())
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request as `tenant_id` and return the response.
pub async fn get_json(app: Router, uri: &str, tenant_id: Uuid) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header(TENANT_HEADER, tenant_id.to_string())
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
