//! Generation jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::TokenUsage;

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A synchronous or streamed conversational turn.
    Conversation,
    /// A fire-and-poll artifact generation.
    ArtifactGeneration,
    /// A turn of the project creation flow.
    ProjectCreation,
}

impl JobType {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::ArtifactGeneration => "artifact_generation",
            Self::ProjectCreation => "project_creation",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "artifact_generation" => Ok(Self::ArtifactGeneration),
            "project_creation" => Ok(Self::ProjectCreation),
            other => Err(DomainError::Validation(format!("unknown job type: {other}"))),
        }
    }
}

/// Lifecycle of a job: `pending → running → {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the job has not settled yet and still holds a token reservation.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled)
            | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::Validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Durable record of one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Owning project. Project creation jobs run before their project
    /// exists and carry the creation session id instead.
    pub project_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Unique within `(project_id, job_type)` when present.
    pub idempotency_key: Option<String>,
    pub input_params: serde_json::Value,
    pub output_result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    /// Percent complete, 0–100.
    pub progress: i32,
    /// Tokens counted against the daily quota while the job is in flight.
    pub reserved_tokens: i64,
    pub usage: Option<TokenUsage>,
    pub duration_ms: Option<i64>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    /// Tokens this job counts against the daily window: its reservation while
    /// in flight, its actual usage once settled.
    #[must_use]
    pub fn billable_tokens(&self) -> i64 {
        if self.status.is_in_flight() {
            self.reserved_tokens
        } else {
            self.usage.map_or(0, |u| u.total_tokens)
        }
    }
}
