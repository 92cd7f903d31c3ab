//! Persistence ports.
//!
//! All reads and writes happen inside a [`StoreTx`] obtained from
//! [`Store::begin`]. `lock_*` methods take a row lock held until the
//! transaction ends, which is how concurrent sends to one session serialize.
//! Dropping a transaction without calling [`StoreTx::commit`] rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::{
    ArtifactType, ArtifactVersion, ConversationSession, ConversationTurn, GenerationJob, JobType,
    Project, ProjectArtifact, ProjectCreationSession, Tenant, UsageEvent,
};

/// Tenant reads and balance adjustments.
#[async_trait]
pub trait TenantRepository: Send {
    /// Loads a tenant without locking.
    async fn find_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError>;

    /// Loads a tenant and locks its row.
    async fn lock_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError>;

    /// Adds `delta` (usually negative) to the tenant's balance.
    async fn adjust_token_balance(&mut self, id: Uuid, delta: i64) -> Result<(), DomainError>;
}

/// Project rows.
#[async_trait]
pub trait ProjectRepository: Send {
    async fn find_project(&mut self, id: Uuid) -> Result<Option<Project>, DomainError>;

    async fn insert_project(&mut self, project: &Project) -> Result<(), DomainError>;

    /// Overwrites the descriptive fields a foundation artifact owns.
    async fn update_project_details(
        &mut self,
        id: Uuid,
        title: &str,
        description: &str,
        genre: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;
}

/// Conversation sessions and their turn log.
#[async_trait]
pub trait SessionRepository: Send {
    /// Loads a session and locks its row (`SELECT … FOR UPDATE`).
    async fn lock_session(&mut self, id: Uuid) -> Result<Option<ConversationSession>, DomainError>;

    async fn insert_session(&mut self, session: &ConversationSession) -> Result<(), DomainError>;

    async fn update_session_task(
        &mut self,
        id: Uuid,
        task: ArtifactType,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    async fn insert_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError>;

    /// All turns of a session, oldest first.
    async fn list_turns(&mut self, session_id: Uuid) -> Result<Vec<ConversationTurn>, DomainError>;
}

/// Artifacts and their version ledger.
#[async_trait]
pub trait ArtifactRepository: Send {
    /// Inserts unless `(project_id, artifact_type)` already exists. Returns
    /// whether a row was written.
    async fn insert_artifact_if_absent(
        &mut self,
        artifact: &ProjectArtifact,
    ) -> Result<bool, DomainError>;

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError>;

    /// Loads an artifact and locks its row so version numbering is serialized.
    async fn lock_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError>;

    async fn find_artifact_by_type(
        &mut self,
        project_id: Uuid,
        artifact_type: ArtifactType,
    ) -> Result<Option<ProjectArtifact>, DomainError>;

    async fn list_artifacts(&mut self, project_id: Uuid)
    -> Result<Vec<ProjectArtifact>, DomainError>;

    /// Highest `version_no` across all branches; 0 when there are none.
    async fn max_version_no(&mut self, artifact_id: Uuid) -> Result<i32, DomainError>;

    /// Newest version on `branch_key`, if any.
    async fn latest_version_on_branch(
        &mut self,
        artifact_id: Uuid,
        branch_key: &str,
    ) -> Result<Option<ArtifactVersion>, DomainError>;

    async fn find_version(&mut self, id: Uuid) -> Result<Option<ArtifactVersion>, DomainError>;

    async fn insert_version(&mut self, version: &ArtifactVersion) -> Result<(), DomainError>;

    /// Points the artifact at `version_id`. Ownership is checked by callers.
    async fn set_active_version(
        &mut self,
        artifact_id: Uuid,
        version_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Versions ordered by `version_no`, optionally restricted to one branch.
    async fn list_versions(
        &mut self,
        artifact_id: Uuid,
        branch_key: Option<&str>,
    ) -> Result<Vec<ArtifactVersion>, DomainError>;

    /// The highest-numbered version of every distinct branch.
    async fn branch_heads(&mut self, artifact_id: Uuid)
    -> Result<Vec<ArtifactVersion>, DomainError>;
}

/// Generation job rows.
#[async_trait]
pub trait JobRepository: Send {
    /// Inserts unless a job with the same `(project_id, job_type,
    /// idempotency_key)` exists. Returns whether a row was written.
    async fn insert_job_if_absent(&mut self, job: &GenerationJob) -> Result<bool, DomainError>;

    async fn find_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError>;

    async fn lock_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError>;

    /// Most recent job of the tenant carrying `key`.
    async fn find_job_by_idempotency_key(
        &mut self,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>, DomainError>;

    /// The job holding `key` within `(project_id, job_type)`, the scope the
    /// uniqueness constraint covers.
    async fn find_job_by_scoped_key(
        &mut self,
        project_id: Uuid,
        job_type: JobType,
        key: &str,
    ) -> Result<Option<GenerationJob>, DomainError>;

    /// Writes every mutable column of `job`.
    async fn update_job(&mut self, job: &GenerationJob) -> Result<(), DomainError>;

    /// Newest first.
    async fn list_jobs(
        &mut self,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, DomainError>;

    /// Sum of [`GenerationJob::billable_tokens`] for jobs created in `[from, to)`.
    async fn sum_job_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError>;
}

/// Direct LLM usage events.
#[async_trait]
pub trait UsageRepository: Send {
    async fn insert_usage_event(&mut self, event: &UsageEvent) -> Result<(), DomainError>;

    async fn sum_usage_event_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError>;
}

/// Project creation sessions and their turn log.
#[async_trait]
pub trait CreationRepository: Send {
    async fn insert_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError>;

    async fn lock_creation_session(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ProjectCreationSession>, DomainError>;

    async fn update_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError>;

    async fn insert_creation_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError>;

    async fn list_creation_turns(
        &mut self,
        session_id: Uuid,
    ) -> Result<Vec<ConversationTurn>, DomainError>;
}

/// An open unit of work over every repository.
#[async_trait]
pub trait StoreTx:
    TenantRepository
    + ProjectRepository
    + SessionRepository
    + ArtifactRepository
    + JobRepository
    + UsageRepository
    + CreationRepository
    + Send
{
    /// Makes every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

/// Entry point to the relational store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DomainError>;
}
