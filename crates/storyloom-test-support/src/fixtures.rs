//! Row builders with sensible defaults.

use chrono::{DateTime, Utc};
use serde_json::json;
use storyloom_core::model::{
    ArtifactType, ConversationSession, CreationStage, CreationStatus, GenerationJob, JobStatus,
    JobType, Project, ProjectCreationSession, Tenant, TokenUsage,
};
use uuid::Uuid;

use crate::clock::fixed_now;

/// A tenant with a comfortable balance and the given daily quota.
#[must_use]
pub fn tenant(daily_token_quota: i64) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "Inkwell Press".to_owned(),
        token_balance: 1_000_000,
        daily_token_quota,
    }
}

/// A project owned by `tenant_id`.
#[must_use]
pub fn project(tenant_id: Uuid) -> Project {
    Project {
        id: Uuid::new_v4(),
        tenant_id,
        title: "The Salt Archive".to_owned(),
        description: "A cartographer maps a drowning city.".to_owned(),
        genre: "fantasy".to_owned(),
        created_at: fixed_now(),
        updated_at: fixed_now(),
    }
}

/// A conversation session on `project` working on `task`.
#[must_use]
pub fn conversation_session(project: &Project, task: ArtifactType) -> ConversationSession {
    ConversationSession {
        id: Uuid::new_v4(),
        tenant_id: project.tenant_id,
        project_id: project.id,
        current_task: task,
        created_at: fixed_now(),
        updated_at: fixed_now(),
    }
}

/// An active creation session at `stage` with a filled-in draft.
#[must_use]
pub fn creation_session(tenant_id: Uuid, stage: CreationStage) -> ProjectCreationSession {
    ProjectCreationSession {
        id: Uuid::new_v4(),
        tenant_id,
        user_id: Uuid::new_v4(),
        stage,
        status: CreationStatus::Active,
        draft: json!({
            "title": "Glass Tide",
            "description": "Smugglers run light through a city of mirrors.",
            "genre": "science fantasy"
        }),
        created_project_id: None,
        created_project_session_id: None,
        created_at: fixed_now(),
        updated_at: fixed_now(),
    }
}

/// A job in `status` created at `at`. Settled jobs report `tokens` of usage;
/// in-flight jobs reserve `tokens`.
#[must_use]
pub fn job(
    tenant_id: Uuid,
    project_id: Uuid,
    status: JobStatus,
    tokens: i64,
    at: DateTime<Utc>,
) -> GenerationJob {
    let settled = !status.is_in_flight();
    GenerationJob {
        id: Uuid::new_v4(),
        tenant_id,
        project_id,
        chapter_id: None,
        job_type: JobType::Conversation,
        status,
        idempotency_key: None,
        input_params: json!({}),
        output_result: None,
        error_message: None,
        retry_count: 0,
        progress: if settled { 100 } else { 0 },
        reserved_tokens: if settled { 0 } else { tokens },
        usage: settled.then(|| TokenUsage::new(tokens / 2, tokens - tokens / 2)),
        duration_ms: None,
        scheduled_at: at,
        started_at: Some(at),
        completed_at: settled.then_some(at),
        created_at: at,
        updated_at: at,
    }
}
