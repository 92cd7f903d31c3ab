//! Conversation sessions and their append-only turn log.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::ArtifactType;

/// A per-project chat thread. Its row is the lock that serializes sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    /// The artifact type this session is currently producing.
    pub current_task: ArtifactType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for TurnRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(DomainError::Validation(format!("unknown turn role: {other}"))),
        }
    }
}

/// One message in a session. Turns are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: TurnRole,
    /// Task the turn was produced for; `None` in the project creation log.
    pub task: Option<ArtifactType>,
    pub content: String,
    /// Attachments, usage stats, conflict warnings.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
