//! Row shapes and their conversion into domain types.
//!
//! Enum columns are stored as their `as_str` names; a row holding an
//! unknown name is reported as an infrastructure error.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use storyloom_core::error::DomainError;
use storyloom_core::model::{
    ArtifactVersion, ConversationSession, ConversationTurn, GenerationJob, Project,
    ProjectArtifact, ProjectCreationSession, Tenant, TokenUsage,
};

pub(crate) fn infra(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(e.to_string())
}

fn parse<T>(column: &str, raw: &str) -> Result<T, DomainError>
where
    T: std::str::FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e| DomainError::Infrastructure(format!("corrupt {column} column: {e}")))
}

#[derive(FromRow)]
pub(crate) struct TenantRow {
    id: Uuid,
    name: String,
    token_balance: i64,
    daily_token_quota: i64,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            token_balance: row.token_balance,
            daily_token_quota: row.daily_token_quota,
        }
    }
}

#[derive(FromRow)]
pub(crate) struct ProjectRow {
    id: Uuid,
    tenant_id: Uuid,
    title: String,
    description: String,
    genre: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            title: row.title,
            description: row.description,
            genre: row.genre,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
pub(crate) struct SessionRow {
    id: Uuid,
    tenant_id: Uuid,
    project_id: Uuid,
    current_task: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for ConversationSession {
    type Error = DomainError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            project_id: row.project_id,
            current_task: parse("current_task", &row.current_task)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Shared by the conversation and creation turn logs; the creation log has
/// no `task` column and selects `NULL` in its place.
#[derive(FromRow)]
pub(crate) struct TurnRow {
    id: Uuid,
    session_id: Uuid,
    role: String,
    task: Option<String>,
    content: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<TurnRow> for ConversationTurn {
    type Error = DomainError;

    fn try_from(row: TurnRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            role: parse("role", &row.role)?,
            task: row.task.as_deref().map(|t| parse("task", t)).transpose()?,
            content: row.content,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct ArtifactRow {
    id: Uuid,
    tenant_id: Uuid,
    project_id: Uuid,
    artifact_type: String,
    active_version_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for ProjectArtifact {
    type Error = DomainError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            project_id: row.project_id,
            artifact_type: parse("artifact_type", &row.artifact_type)?,
            active_version_id: row.active_version_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct VersionRow {
    id: Uuid,
    artifact_id: Uuid,
    version_no: i32,
    branch_key: String,
    parent_version_id: Option<Uuid>,
    content: serde_json::Value,
    created_by: Option<Uuid>,
    source_job_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<VersionRow> for ArtifactVersion {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            artifact_id: row.artifact_id,
            version_no: row.version_no,
            branch_key: row.branch_key,
            parent_version_id: row.parent_version_id,
            content: row.content,
            created_by: row.created_by,
            source_job_id: row.source_job_id,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
pub(crate) struct JobRow {
    id: Uuid,
    tenant_id: Uuid,
    project_id: Uuid,
    chapter_id: Option<Uuid>,
    job_type: String,
    status: String,
    idempotency_key: Option<String>,
    input_params: serde_json::Value,
    output_result: Option<serde_json::Value>,
    error_message: Option<String>,
    retry_count: i32,
    progress: i32,
    reserved_tokens: i64,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
    duration_ms: Option<i64>,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for GenerationJob {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let usage = match (row.prompt_tokens, row.completion_tokens, row.total_tokens) {
            (Some(prompt_tokens), Some(completion_tokens), Some(total_tokens)) => {
                Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                })
            }
            _ => None,
        };
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            project_id: row.project_id,
            chapter_id: row.chapter_id,
            job_type: parse("job_type", &row.job_type)?,
            status: parse("status", &row.status)?,
            idempotency_key: row.idempotency_key,
            input_params: row.input_params,
            output_result: row.output_result,
            error_message: row.error_message,
            retry_count: row.retry_count,
            progress: row.progress,
            reserved_tokens: row.reserved_tokens,
            usage,
            duration_ms: row.duration_ms,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct CreationSessionRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    stage: String,
    status: String,
    draft: serde_json::Value,
    created_project_id: Option<Uuid>,
    created_project_session_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CreationSessionRow> for ProjectCreationSession {
    type Error = DomainError;

    fn try_from(row: CreationSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            stage: parse("stage", &row.stage)?,
            status: parse("status", &row.status)?,
            draft: row.draft,
            created_project_id: row.created_project_id,
            created_project_session_id: row.created_project_session_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
