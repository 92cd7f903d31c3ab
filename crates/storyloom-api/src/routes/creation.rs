//! Routes for the guided project creation dialogue.

use axum::extract::State;
use axum::{Json, Router, routing::post};
use serde::Deserialize;
use storyloom_core::scope::RequestScope;
use storyloom_orchestration::domain::commands::CreationMessage;
use storyloom_orchestration::domain::outcome::CreationOutcome;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::TenantId;
use crate::state::AppState;

/// Request body for POST /messages.
#[derive(Debug, Deserialize)]
pub struct CreationMessageRequest {
    /// Omit to start a new dialogue.
    pub creation_session_id: Option<Uuid>,
    pub user_id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub scope: RequestScope,
}

/// POST /messages
#[instrument(skip(state, request), fields(tenant_id = %tenant_id))]
async fn send_creation_message(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(request): Json<CreationMessageRequest>,
) -> Result<Json<CreationOutcome>, ApiError> {
    let command = CreationMessage {
        correlation_id: Uuid::new_v4(),
        tenant_id,
        user_id: request.user_id,
        creation_session_id: request.creation_session_id,
        prompt: request.prompt,
        scope: request.scope,
    };
    info!(correlation_id = %command.correlation_id, "handling creation_message request");

    let outcome = state.creation.handle_message(&command).await?;
    Ok(Json(outcome))
}

/// Returns the router for project creation.
pub fn router() -> Router<AppState> {
    Router::new().route("/messages", post(send_creation_message))
}
