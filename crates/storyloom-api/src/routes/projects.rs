//! Project-scoped routes: async generation jobs and artifact lookup.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Deserialize;
use storyloom_artifacts::application::queries::{self, ActiveArtifact};
use storyloom_core::capability::Attachment;
use storyloom_core::error::NotFoundError;
use storyloom_core::model::{ArtifactType, GenerationJob};
use storyloom_core::scope::RequestScope;
use storyloom_orchestration::domain::commands::{JobInput, SubmitJob};
use storyloom_orchestration::domain::outcome::JobSubmission;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::TenantId;
use crate::state::AppState;

const DEFAULT_JOB_LIMIT: i64 = 20;

/// Request body for POST /{project_id}/jobs.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub artifact_type: ArtifactType,
    pub prompt: String,
    pub chapter_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub branch_key: Option<String>,
    pub activate: Option<bool>,
    pub created_by: Option<Uuid>,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub scope: RequestScope,
}

/// Query string for GET /{project_id}/jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

/// POST /{project_id}/jobs
///
/// Answers 202 for a new job and 200 when an idempotency key replays an
/// earlier one.
#[instrument(skip(state, request), fields(tenant_id = %tenant_id, project_id = %project_id))]
async fn submit_job(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<Uuid>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobSubmission>), ApiError> {
    let command = SubmitJob {
        correlation_id: Uuid::new_v4(),
        tenant_id,
        project_id,
        chapter_id: request.chapter_id,
        input: JobInput {
            artifact_type: request.artifact_type,
            prompt: request.prompt,
            attachments: request.attachments,
            branch_key: request.branch_key,
            activate: request.activate,
            created_by: request.created_by,
            scope: request.scope,
        },
        idempotency_key: request.idempotency_key,
    };
    info!(correlation_id = %command.correlation_id, "handling submit_job request");

    let submission = state.orchestrator.dispatch_job(&command).await?;
    let status = if submission.replayed {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(submission)))
}

/// GET /{project_id}/jobs
async fn list_jobs(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<GenerationJob>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT);
    let jobs = state
        .orchestrator
        .list_jobs(tenant_id, project_id, limit)
        .await?;
    Ok(Json(jobs))
}

/// GET /{project_id}/artifacts/{artifact_type}
///
/// `null` when the project never generated that type.
async fn get_artifact(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path((project_id, artifact_type)): Path<(Uuid, ArtifactType)>,
) -> Result<Json<Option<ActiveArtifact>>, ApiError> {
    let mut tx = state.store.begin().await?;
    let owned = tx
        .find_project(project_id)
        .await?
        .is_some_and(|p| p.tenant_id == tenant_id);
    if !owned {
        return Err(ApiError(NotFoundError::Project(project_id).into()));
    }
    let artifact = queries::get_artifact_by_type(&mut *tx, project_id, artifact_type).await?;
    Ok(Json(artifact))
}

/// Returns the router for project-scoped resources.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{project_id}/jobs", get(list_jobs).post(submit_job))
        .route("/{project_id}/artifacts/{artifact_type}", get(get_artifact))
}
