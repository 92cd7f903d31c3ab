//! Tenants, projects, and token accounting records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A billing tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Remaining token balance. May go negative after best-effort deduction.
    pub token_balance: i64,
    /// Maximum tokens per UTC day; `0` means unlimited.
    pub daily_token_quota: i64,
}

impl Tenant {
    /// The daily quota as an option, `None` meaning unlimited.
    #[must_use]
    pub fn daily_quota(&self) -> Option<i64> {
        (self.daily_token_quota > 0).then_some(self.daily_token_quota)
    }
}

/// A writing project owned by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: String,
    pub genre: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Whether the project carries any metadata worth scanning for conflicts.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        !(self.title.trim().is_empty()
            && self.description.trim().is_empty()
            && self.genre.trim().is_empty())
    }
}

/// Token counts reported by a generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl TokenUsage {
    /// Builds a usage record, deriving the total.
    #[must_use]
    pub fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A direct LLM usage record not tied to a generation job's own accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    /// What made the call, e.g. `conflict_scan`.
    pub source: String,
    pub provider: String,
    pub model: String,
    pub total_tokens: i64,
    pub created_at: DateTime<Utc>,
}
