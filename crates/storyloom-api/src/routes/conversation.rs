//! Routes for sending messages in a conversation session.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, routing::post};
use futures::Stream;
use futures::stream;
use serde::Deserialize;
use storyloom_core::capability::Attachment;
use storyloom_core::model::ArtifactType;
use storyloom_core::scope::RequestScope;
use storyloom_orchestration::domain::commands::SendMessage;
use storyloom_orchestration::domain::outcome::{MessageOutcome, StreamEvent};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::TenantId;
use crate::state::AppState;

/// Request body for POST /{session_id}/messages and its streaming twin.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Project the session belongs to.
    pub project_id: Uuid,
    pub prompt: String,
    pub user_id: Option<Uuid>,
    /// Switches the session to another artifact type first.
    pub task: Option<ArtifactType>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub branch_key: Option<String>,
    pub activate: Option<bool>,
    pub enable_conflict_scan: Option<bool>,
    #[serde(default)]
    pub scope: RequestScope,
}

impl SendMessageRequest {
    fn into_command(self, tenant_id: Uuid, session_id: Uuid) -> SendMessage {
        SendMessage {
            correlation_id: Uuid::new_v4(),
            tenant_id,
            project_id: self.project_id,
            session_id,
            user_id: self.user_id,
            task: self.task,
            prompt: self.prompt,
            attachments: self.attachments,
            branch_key: self.branch_key,
            activate: self.activate,
            enable_conflict_scan: self.enable_conflict_scan,
            scope: self.scope,
        }
    }
}

/// POST /{session_id}/messages
#[instrument(skip(state, request), fields(tenant_id = %tenant_id, session_id = %session_id))]
async fn send_message(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<MessageOutcome>, ApiError> {
    let command = request.into_command(tenant_id, session_id);
    info!(correlation_id = %command.correlation_id, "handling send_message request");

    let outcome = state.orchestrator.send_message(&command).await?;
    Ok(Json(outcome))
}

/// POST /{session_id}/messages/stream
///
/// Phase 1 errors are returned as plain JSON errors. Once the stream opens,
/// each [`StreamEvent`] becomes one server-sent event named after its type.
/// Closing the connection cancels the generation.
#[instrument(skip(state, request), fields(tenant_id = %tenant_id, session_id = %session_id))]
async fn stream_message(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let command = request.into_command(tenant_id, session_id);
    info!(correlation_id = %command.correlation_id, "handling stream_message request");

    let messages = state.orchestrator.stream_message(&command).await?;
    let events = stream::unfold(messages, |mut messages| async move {
        let event = messages.next().await?;
        Some((to_sse(&event), messages))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StreamEvent) -> Result<Event, axum::Error> {
    let name = match event {
        StreamEvent::Chunk(_) => "chunk",
        StreamEvent::Usage(_) => "usage",
        StreamEvent::Done(_) => "done",
        StreamEvent::Error(_) => "error",
    };
    Event::default().event(name).json_data(event)
}

/// Returns the router for conversation sessions.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{session_id}/messages", post(send_message))
        .route("/{session_id}/messages/stream", post(stream_message))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;
    use storyloom_core::capability::CapabilityError;
    use storyloom_test_support::ScriptedGenerator;
    use tower::ServiceExt;

    use crate::testing::{body_json, json_request, seeded, seeded_with};

    #[tokio::test]
    async fn test_send_message_returns_200_with_new_version() {
        // Arrange
        let (store, state, ids) = seeded().await;
        let app = router().with_state(state);
        let request = json_request(
            "POST",
            &format!("/{}/messages", ids.session_id),
            ids.tenant_id,
            &json!({ "project_id": ids.project_id, "prompt": "a city on glass tides" }),
        );

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["version_no"], 1);
        assert_eq!(json["branch_key"], "main");
        assert_eq!(json["activated"], true);
        assert_eq!(json["artifact_type"], "worldview");
        assert_eq!(store.snapshot().await.versions.len(), 1);
    }

    #[tokio::test]
    async fn test_send_message_to_unknown_session_returns_404() {
        // Arrange
        let (_, state, ids) = seeded().await;
        let app = router().with_state(state);
        let request = json_request(
            "POST",
            &format!("/{}/messages", Uuid::new_v4()),
            ids.tenant_id,
            &json!({ "project_id": ids.project_id, "prompt": "hello" }),
        );

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "session_not_found");
    }

    #[tokio::test]
    async fn test_send_message_without_tenant_header_returns_400() {
        // Arrange
        let (_, state, ids) = seeded().await;
        let app = router().with_state(state);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/{}/messages", ids.session_id))
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                json!({ "project_id": ids.project_id, "prompt": "hello" }).to_string(),
            ))
            .unwrap();

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_message_returns_500_when_generation_fails() {
        // Arrange
        let generator =
            ScriptedGenerator::new().with_failure(CapabilityError::Unavailable("timeout".into()));
        let (_, state, ids) = seeded_with(generator).await;
        let app = router().with_state(state);
        let request = json_request(
            "POST",
            &format!("/{}/messages", ids.session_id),
            ids.tenant_id,
            &json!({ "project_id": ids.project_id, "prompt": "hello" }),
        );

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "infrastructure_error");
    }

    #[tokio::test]
    async fn test_stream_message_emits_named_events_ending_in_done() {
        // Arrange
        let (_, state, ids) = seeded().await;
        let app = router().with_state(state);
        let request = json_request(
            "POST",
            &format!("/{}/messages/stream", ids.session_id),
            ids.tenant_id,
            &json!({ "project_id": ids.project_id, "prompt": "a city on glass tides" }),
        );

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: chunk"));
        assert!(text.contains("event: usage"));
        assert!(text.trim_end().contains("event: done"));
        assert!(!text.contains("event: error"));
    }

    #[tokio::test]
    async fn test_stream_message_rejects_empty_prompt_before_streaming() {
        // Arrange
        let (_, state, ids) = seeded().await;
        let app = router().with_state(state);
        let request = json_request(
            "POST",
            &format!("/{}/messages/stream", ids.session_id),
            ids.tenant_id,
            &json!({ "project_id": ids.project_id, "prompt": "   " }),
        );

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
