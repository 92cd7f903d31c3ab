//! Commands accepted by the orchestration entry points.

use serde::{Deserialize, Serialize};
use storyloom_core::capability::Attachment;
use storyloom_core::command::Command;
use storyloom_core::model::ArtifactType;
use storyloom_core::scope::RequestScope;
use uuid::Uuid;

/// Send a message in a conversation session and generate a new version of
/// the session's current artifact.
#[derive(Debug, Clone)]
pub struct SendMessage {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub session_id: Uuid,
    /// Author recorded on the new version.
    pub user_id: Option<Uuid>,
    /// Switches the session to another artifact type first.
    pub task: Option<ArtifactType>,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Branch to write to; blank means `main`.
    pub branch_key: Option<String>,
    /// Overrides the activation policy.
    pub activate: Option<bool>,
    /// Overrides the conflict scan default (on).
    pub enable_conflict_scan: Option<bool>,
    pub scope: RequestScope,
}

impl Command for SendMessage {
    fn command_type(&self) -> &'static str {
        "orchestration.send_message"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }
}

/// Queue a generation job that runs detached from the request.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub input: JobInput,
    /// Replaying a key returns the original job without a new generation.
    pub idempotency_key: Option<String>,
}

impl Command for SubmitJob {
    fn command_type(&self) -> &'static str {
        "orchestration.submit_job"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }
}

/// What an async job generates. Stored as the job's `input_params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub artifact_type: ArtifactType,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub branch_key: Option<String>,
    #[serde(default)]
    pub activate: Option<bool>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub scope: RequestScope,
}

/// One user turn in the project creation dialogue.
#[derive(Debug, Clone)]
pub struct CreationMessage {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Continues this dialogue; `None` starts a new one.
    pub creation_session_id: Option<Uuid>,
    pub prompt: String,
    pub scope: RequestScope,
}

impl Command for CreationMessage {
    fn command_type(&self) -> &'static str {
        "orchestration.creation_message"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }
}

/// Point an artifact at one of its versions. Rolling back is activating an
/// older version.
#[derive(Debug, Clone)]
pub struct ActivateVersion {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub tenant_id: Uuid,
    pub artifact_id: Uuid,
    pub version_id: Uuid,
}

impl Command for ActivateVersion {
    fn command_type(&self) -> &'static str {
        "orchestration.activate_version"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }
}
