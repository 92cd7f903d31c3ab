//! What orchestration entry points hand back to callers.

use serde::Serialize;
use storyloom_core::capability::ConflictWarning;
use storyloom_core::model::{
    ArtifactType, CreationAction, CreationStage, CreationStatus, GenerationJob, TokenUsage,
};
use uuid::Uuid;

/// How the assistant turn was produced. Recorded in turn metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Sync,
    Stream,
    Job,
}

/// Result of a completed send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub job_id: Uuid,
    pub session_id: Uuid,
    pub user_turn_id: Uuid,
    pub assistant_turn_id: Uuid,
    pub artifact_id: Uuid,
    pub artifact_type: ArtifactType,
    pub version_id: Uuid,
    pub version_no: i32,
    pub branch_key: String,
    /// Whether the new version became the artifact's canonical one.
    pub activated: bool,
    pub content: serde_json::Value,
    /// Raw model text.
    pub reply: String,
    pub usage: TokenUsage,
    /// Empty when scanning was skipped or failed.
    pub conflicts: Vec<ConflictWarning>,
}

/// One item of a streamed send, in emission order: any number of `Chunk`s,
/// then `Usage`, then exactly one of `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk(String),
    Usage(TokenUsage),
    Done(Box<MessageOutcome>),
    Error(String),
}

/// Result of submitting an async job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSubmission {
    pub job: GenerationJob,
    /// `true` when an idempotency key matched an earlier submission.
    pub replayed: bool,
}

/// Result of one project creation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreationOutcome {
    pub creation_session_id: Uuid,
    pub stage: CreationStage,
    pub status: CreationStatus,
    /// The action actually taken, after the confirmation gate.
    pub action: CreationAction,
    pub reply: String,
    pub draft: serde_json::Value,
    pub project_id: Option<Uuid>,
    pub project_session_id: Option<Uuid>,
    pub job_id: Uuid,
    pub usage: TokenUsage,
}
