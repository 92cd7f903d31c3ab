//! Domain error types.
//!
//! Every fallible core operation returns [`DomainError`], a closed union that
//! callers match exhaustively instead of probing for concrete error types.

use thiserror::Error;
use uuid::Uuid;

use crate::model::JobStatus;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Admission control rejected the request.
    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// A referenced entity does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The request conflicts with the current state.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for failures worth retrying unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

/// Token admission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// The tenant's balance is below the pre-flight requirement.
    #[error("token balance exceeded for tenant {tenant_id}: balance {balance}, required {required}")]
    BalanceExceeded {
        /// The tenant that was checked.
        tenant_id: Uuid,
        /// Balance at the time of the check.
        balance: i64,
        /// Minimum balance the operation requires.
        required: i64,
    },

    /// The tenant has used up its daily allowance.
    #[error("daily token quota exceeded for tenant {tenant_id}: used {used}, max {max}")]
    DailyQuotaExceeded {
        /// The tenant that was checked.
        tenant_id: Uuid,
        /// Tokens counted against today's window.
        used: i64,
        /// Configured daily maximum.
        max: i64,
    },
}

/// Missing entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("tenant not found: {0}")]
    Tenant(Uuid),
    #[error("project not found: {0}")]
    Project(Uuid),
    #[error("conversation session not found: {0}")]
    Session(Uuid),
    #[error("project creation session not found: {0}")]
    CreationSession(Uuid),
    #[error("artifact not found: {0}")]
    Artifact(Uuid),
    #[error("version not found: {0}")]
    Version(Uuid),
    #[error("job not found: {0}")]
    Job(Uuid),
}

/// State conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// The version exists but belongs to another artifact.
    #[error("version {version_id} does not belong to artifact {artifact_id}")]
    VersionNotInArtifact {
        /// The artifact being updated.
        artifact_id: Uuid,
        /// The foreign version.
        version_id: Uuid,
    },

    /// A parent version reference no longer matches the artifact.
    #[error("stale branch base {version_id} for artifact {artifact_id}")]
    StaleBranchBase {
        /// The artifact being versioned.
        artifact_id: Uuid,
        /// The parent that failed validation.
        version_id: Uuid,
    },

    /// The job already reached a terminal state.
    #[error("job {job_id} is already {status}")]
    JobTerminal {
        /// The job.
        job_id: Uuid,
        /// Its terminal status.
        status: JobStatus,
    },

    /// An idempotency key was replayed against a different project or job type.
    #[error("idempotency key {key} already used by job {job_id}")]
    IdempotencyKeyMismatch {
        /// The replayed key.
        key: String,
        /// The job that owns it.
        job_id: Uuid,
    },

    /// The project creation flow already finished.
    #[error("project creation session {0} is closed")]
    CreationSessionClosed(Uuid),
}
