//! Routes for polling and cancelling generation jobs.

use axum::extract::{Path, State};
use axum::{Json, Router, routing::get, routing::post};
use storyloom_core::model::GenerationJob;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::TenantId;
use crate::state::AppState;

/// GET /{job_id}
async fn get_job(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<GenerationJob>, ApiError> {
    let job = state.orchestrator.get_job(tenant_id, job_id).await?;
    Ok(Json(job))
}

/// POST /{job_id}/cancel
#[instrument(skip(state), fields(tenant_id = %tenant_id, job_id = %job_id))]
async fn cancel_job(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<GenerationJob>, ApiError> {
    let job = state.orchestrator.cancel_job(tenant_id, job_id).await?;
    Ok(Json(job))
}

/// Returns the router for jobs.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{job_id}", get(get_job))
        .route("/{job_id}/cancel", post(cancel_job))
}
