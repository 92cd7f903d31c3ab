//! Routes for browsing, comparing, and activating artifact versions.

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get, routing::post};
use serde::Deserialize;
use storyloom_artifacts::application::{queries, version_store};
use storyloom_artifacts::domain::diff::ArtifactDiff;
use storyloom_core::error::{DomainError, NotFoundError};
use storyloom_core::model::{ArtifactVersion, BranchHead, ProjectArtifact};
use storyloom_core::repository::StoreTx;
use storyloom_orchestration::domain::commands::ActivateVersion;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::TenantId;
use crate::state::AppState;

/// Query string for GET /{artifact_id}/versions.
#[derive(Debug, Deserialize)]
pub struct ListVersionsQuery {
    /// Restricts the listing to one branch.
    pub branch: Option<String>,
}

/// Query string for GET /{artifact_id}/compare.
#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: Uuid,
    pub to: Uuid,
}

/// Request body for POST /{artifact_id}/activate.
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub version_id: Uuid,
}

/// Hides artifacts of other tenants behind a 404.
async fn ensure_owned(
    tx: &mut dyn StoreTx,
    tenant_id: Uuid,
    artifact_id: Uuid,
) -> Result<(), DomainError> {
    let owned = tx
        .find_artifact(artifact_id)
        .await?
        .is_some_and(|a| a.tenant_id == tenant_id);
    if owned {
        Ok(())
    } else {
        Err(NotFoundError::Artifact(artifact_id).into())
    }
}

/// GET /{artifact_id}/versions
async fn list_versions(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(artifact_id): Path<Uuid>,
    Query(query): Query<ListVersionsQuery>,
) -> Result<Json<Vec<ArtifactVersion>>, ApiError> {
    let mut tx = state.store.begin().await?;
    ensure_owned(&mut *tx, tenant_id, artifact_id).await?;
    let versions = queries::list_versions(&mut *tx, artifact_id, query.branch.as_deref()).await?;
    Ok(Json(versions))
}

/// GET /{artifact_id}/branches
async fn list_branches(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(artifact_id): Path<Uuid>,
) -> Result<Json<Vec<BranchHead>>, ApiError> {
    let mut tx = state.store.begin().await?;
    ensure_owned(&mut *tx, tenant_id, artifact_id).await?;
    let heads = version_store::list_branch_heads(&mut *tx, artifact_id).await?;
    Ok(Json(heads))
}

/// GET /{artifact_id}/compare?from=…&to=…
async fn compare(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(artifact_id): Path<Uuid>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<ArtifactDiff>, ApiError> {
    let mut tx = state.store.begin().await?;
    ensure_owned(&mut *tx, tenant_id, artifact_id).await?;
    let diff = queries::compare_versions(&mut *tx, artifact_id, query.from, query.to).await?;
    Ok(Json(diff))
}

/// POST /{artifact_id}/activate
///
/// Also the rollback endpoint: activating an older version restores it.
#[instrument(skip(state, request), fields(tenant_id = %tenant_id, artifact_id = %artifact_id))]
async fn activate(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(artifact_id): Path<Uuid>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<ProjectArtifact>, ApiError> {
    let command = ActivateVersion {
        correlation_id: Uuid::new_v4(),
        tenant_id,
        artifact_id,
        version_id: request.version_id,
    };
    info!(correlation_id = %command.correlation_id, "handling activate_version request");

    let artifact = state.orchestrator.activate_version(&command).await?;
    Ok(Json(artifact))
}

/// Returns the router for artifacts.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{artifact_id}/versions", get(list_versions))
        .route("/{artifact_id}/branches", get(list_branches))
        .route("/{artifact_id}/compare", get(compare))
        .route("/{artifact_id}/activate", post(activate))
}
