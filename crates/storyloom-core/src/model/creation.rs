//! Project creation flow state.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Ordered stages of the creation dialogue. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStage {
    /// Collecting the premise.
    Gathering,
    /// Draft complete, awaiting explicit confirmation.
    Confirm,
    /// A project was created.
    Completed,
}

impl CreationStage {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gathering => "gathering",
            Self::Confirm => "confirm",
            Self::Completed => "completed",
        }
    }

    /// Moves to `next` unless that would go backwards.
    #[must_use]
    pub fn advance_to(self, next: Self) -> Self {
        self.max(next)
    }
}

impl FromStr for CreationStage {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gathering" => Ok(Self::Gathering),
            "confirm" => Ok(Self::Confirm),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::Validation(format!(
                "unknown creation stage: {other}"
            ))),
        }
    }
}

/// Whether a creation session still accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStatus {
    Active,
    Completed,
}

impl CreationStatus {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for CreationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::Validation(format!(
                "unknown creation status: {other}"
            ))),
        }
    }
}

/// Side effect the generation capability asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationAction {
    #[default]
    None,
    /// Suggest creating the project; nothing is written.
    ProposeCreation,
    /// Create the project now. Subject to the confirmation gate.
    CreateProject,
}

/// A guided dialogue that ends by creating a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCreationSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub stage: CreationStage,
    pub status: CreationStatus,
    /// Working draft: title, description, genre, and anything else gathered.
    pub draft: serde_json::Value,
    pub created_project_id: Option<Uuid>,
    pub created_project_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_never_moves_backwards() {
        assert_eq!(
            CreationStage::Confirm.advance_to(CreationStage::Gathering),
            CreationStage::Confirm
        );
        assert_eq!(
            CreationStage::Gathering.advance_to(CreationStage::Confirm),
            CreationStage::Confirm
        );
    }
}
