//! Artifacts and their immutable versions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// The trunk branch every artifact starts on.
pub const MAIN_BRANCH: &str = "main";

const MAX_BRANCH_KEY_LEN: usize = 64;

/// Kind of structured document an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Setting, rules, and history of the story world.
    Worldview,
    /// Cast list with traits and relationships.
    Characters,
    /// Chapter-level plot outline.
    Outline,
    /// Project foundation: title, logline, genre.
    Foundation,
}

impl ArtifactType {
    /// Types whose active content is sent with every generation call.
    pub const ALWAYS_VISIBLE: [Self; 3] = [Self::Worldview, Self::Characters, Self::Outline];

    /// All types in a stable order.
    pub const ALL: [Self; 4] = [
        Self::Worldview,
        Self::Characters,
        Self::Outline,
        Self::Foundation,
    ];

    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worldview => "worldview",
            Self::Characters => "characters",
            Self::Outline => "outline",
            Self::Foundation => "foundation",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown artifact type: {s}")))
    }
}

/// A typed document slot within a project. One per `(project, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectArtifact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub artifact_type: ArtifactType,
    /// The canonical version; always one of this artifact's own versions.
    pub active_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of artifact content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub id: Uuid,
    pub artifact_id: Uuid,
    /// Strictly increasing per artifact across all branches.
    pub version_no: i32,
    pub branch_key: String,
    pub parent_version_id: Option<Uuid>,
    pub content: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub source_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a version to an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifactVersion {
    pub branch_key: String,
    pub parent_version_id: Option<Uuid>,
    pub content: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub source_job_id: Option<Uuid>,
}

/// The newest version on one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchHead {
    pub branch_key: String,
    pub version_id: Uuid,
    pub version_no: i32,
    pub created_at: DateTime<Utc>,
    /// Whether this head is the artifact's active version.
    pub is_active: bool,
}

/// Normalizes and validates a caller-supplied branch key.
///
/// Blank or missing keys resolve to [`MAIN_BRANCH`].
///
/// # Errors
///
/// Returns `DomainError::Validation` when the key is too long or contains
/// characters outside `[A-Za-z0-9_./-]`.
pub fn normalize_branch_key(raw: Option<&str>) -> Result<String, DomainError> {
    let key = raw.map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Ok(MAIN_BRANCH.to_owned());
    }
    if key.chars().count() > MAX_BRANCH_KEY_LEN {
        return Err(DomainError::Validation(format!(
            "branch key exceeds {MAX_BRANCH_KEY_LEN} characters"
        )));
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')))
    {
        return Err(DomainError::Validation(format!(
            "branch key contains invalid character {bad:?}"
        )));
    }
    Ok(key.to_owned())
}
