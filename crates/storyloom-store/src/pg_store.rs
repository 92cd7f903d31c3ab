//! `PostgreSQL` implementation of the `Store` port.
//!
//! Each [`PgTx`] wraps one database transaction. `lock_*` reads use
//! `SELECT … FOR UPDATE`, and insert-if-absent writes use
//! `ON CONFLICT DO NOTHING` so unique violations never surface as errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use storyloom_core::error::DomainError;
use storyloom_core::model::{
    ArtifactType, ArtifactVersion, ConversationSession, ConversationTurn, GenerationJob, JobType,
    Project, ProjectArtifact, ProjectCreationSession, Tenant, UsageEvent,
};
use storyloom_core::repository::{
    ArtifactRepository, CreationRepository, JobRepository, ProjectRepository, SessionRepository,
    Store, StoreTx, TenantRepository, UsageRepository,
};

use crate::rows::{
    ArtifactRow, CreationSessionRow, JobRow, ProjectRow, SessionRow, TenantRow, TurnRow,
    VersionRow, infra,
};

const TENANT_COLUMNS: &str = "id, name, token_balance, daily_token_quota";
const PROJECT_COLUMNS: &str = "id, tenant_id, title, description, genre, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, tenant_id, project_id, current_task, created_at, updated_at";
const ARTIFACT_COLUMNS: &str =
    "id, tenant_id, project_id, artifact_type, active_version_id, created_at, updated_at";
const VERSION_COLUMNS: &str = "id, artifact_id, version_no, branch_key, parent_version_id, \
     content, created_by, source_job_id, created_at";
const JOB_COLUMNS: &str = "id, tenant_id, project_id, chapter_id, job_type, status, \
     idempotency_key, input_params, output_result, error_message, retry_count, progress, \
     reserved_tokens, prompt_tokens, completion_tokens, total_tokens, duration_ms, \
     scheduled_at, started_at, completed_at, created_at, updated_at";
const CREATION_SESSION_COLUMNS: &str = "id, tenant_id, user_id, stage, status, draft, \
     created_project_id, created_project_session_id, created_at, updated_at";

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DomainError> {
        let tx = self.pool.begin().await.map_err(infra)?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// An open database transaction. Dropping it rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(infra)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.rollback().await.map_err(infra)
    }
}

#[async_trait]
impl TenantRepository for PgTx {
    async fn find_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(row.map(Tenant::from))
    }

    async fn lock_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(row.map(Tenant::from))
    }

    async fn adjust_token_balance(&mut self, id: Uuid, delta: i64) -> Result<(), DomainError> {
        sqlx::query("UPDATE tenants SET token_balance = token_balance + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for PgTx {
    async fn find_project(&mut self, id: Uuid) -> Result<Option<Project>, DomainError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(row.map(Project::from))
    }

    async fn insert_project(&mut self, project: &Project) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO projects (id, tenant_id, title, description, genre, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(project.id)
        .bind(project.tenant_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.genre)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn update_project_details(
        &mut self,
        id: Uuid,
        title: &str,
        description: &str,
        genre: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE projects SET title = $2, description = $3, genre = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(genre)
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgTx {
    async fn lock_session(&mut self, id: Uuid) -> Result<Option<ConversationSession>, DomainError> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM conversation_sessions WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(ConversationSession::try_from)
            .transpose()
    }

    async fn insert_session(&mut self, session: &ConversationSession) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO conversation_sessions \
             (id, tenant_id, project_id, current_task, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.id)
        .bind(session.tenant_id)
        .bind(session.project_id)
        .bind(session.current_task.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn update_session_task(
        &mut self,
        id: Uuid,
        task: ArtifactType,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE conversation_sessions SET current_task = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(task.as_str())
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn insert_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO conversation_turns \
             (id, session_id, role, task, content, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(turn.id)
        .bind(turn.session_id)
        .bind(turn.role.as_str())
        .bind(turn.task.map(ArtifactType::as_str))
        .bind(&turn.content)
        .bind(&turn.metadata)
        .bind(turn.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn list_turns(&mut self, session_id: Uuid) -> Result<Vec<ConversationTurn>, DomainError> {
        sqlx::query_as::<_, TurnRow>(
            "SELECT id, session_id, role, task, content, metadata, created_at \
             FROM conversation_turns WHERE session_id = $1 ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(infra)?
        .into_iter()
        .map(ConversationTurn::try_from)
        .collect()
    }
}

#[async_trait]
impl ArtifactRepository for PgTx {
    async fn insert_artifact_if_absent(
        &mut self,
        artifact: &ProjectArtifact,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "INSERT INTO project_artifacts \
             (id, tenant_id, project_id, artifact_type, active_version_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (project_id, artifact_type) DO NOTHING",
        )
        .bind(artifact.id)
        .bind(artifact.tenant_id)
        .bind(artifact.project_id)
        .bind(artifact.artifact_type.as_str())
        .bind(artifact.active_version_id)
        .bind(artifact.created_at)
        .bind(artifact.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError> {
        let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM project_artifacts WHERE id = $1");
        sqlx::query_as::<_, ArtifactRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(ProjectArtifact::try_from)
            .transpose()
    }

    async fn lock_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError> {
        let sql =
            format!("SELECT {ARTIFACT_COLUMNS} FROM project_artifacts WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, ArtifactRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(ProjectArtifact::try_from)
            .transpose()
    }

    async fn find_artifact_by_type(
        &mut self,
        project_id: Uuid,
        artifact_type: ArtifactType,
    ) -> Result<Option<ProjectArtifact>, DomainError> {
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM project_artifacts \
             WHERE project_id = $1 AND artifact_type = $2"
        );
        sqlx::query_as::<_, ArtifactRow>(&sql)
            .bind(project_id)
            .bind(artifact_type.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(ProjectArtifact::try_from)
            .transpose()
    }

    async fn list_artifacts(
        &mut self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectArtifact>, DomainError> {
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM project_artifacts \
             WHERE project_id = $1 ORDER BY created_at, artifact_type"
        );
        sqlx::query_as::<_, ArtifactRow>(&sql)
            .bind(project_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(infra)?
            .into_iter()
            .map(ProjectArtifact::try_from)
            .collect()
    }

    async fn max_version_no(&mut self, artifact_id: Uuid) -> Result<i32, DomainError> {
        sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(version_no), 0) FROM artifact_versions WHERE artifact_id = $1",
        )
        .bind(artifact_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(infra)
    }

    async fn latest_version_on_branch(
        &mut self,
        artifact_id: Uuid,
        branch_key: &str,
    ) -> Result<Option<ArtifactVersion>, DomainError> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM artifact_versions \
             WHERE artifact_id = $1 AND branch_key = $2 \
             ORDER BY version_no DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(artifact_id)
            .bind(branch_key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(row.map(ArtifactVersion::from))
    }

    async fn find_version(&mut self, id: Uuid) -> Result<Option<ArtifactVersion>, DomainError> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM artifact_versions WHERE id = $1");
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(row.map(ArtifactVersion::from))
    }

    async fn insert_version(&mut self, version: &ArtifactVersion) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO artifact_versions \
             (id, artifact_id, version_no, branch_key, parent_version_id, content, \
              created_by, source_job_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(version.id)
        .bind(version.artifact_id)
        .bind(version.version_no)
        .bind(&version.branch_key)
        .bind(version.parent_version_id)
        .bind(&version.content)
        .bind(version.created_by)
        .bind(version.source_job_id)
        .bind(version.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn set_active_version(
        &mut self,
        artifact_id: Uuid,
        version_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE project_artifacts SET active_version_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(artifact_id)
        .bind(version_id)
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn list_versions(
        &mut self,
        artifact_id: Uuid,
        branch_key: Option<&str>,
    ) -> Result<Vec<ArtifactVersion>, DomainError> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM artifact_versions \
             WHERE artifact_id = $1 AND ($2::TEXT IS NULL OR branch_key = $2) \
             ORDER BY version_no"
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(artifact_id)
            .bind(branch_key)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(rows.into_iter().map(ArtifactVersion::from).collect())
    }

    async fn branch_heads(
        &mut self,
        artifact_id: Uuid,
    ) -> Result<Vec<ArtifactVersion>, DomainError> {
        let sql = format!(
            "SELECT DISTINCT ON (branch_key) {VERSION_COLUMNS} FROM artifact_versions \
             WHERE artifact_id = $1 ORDER BY branch_key, version_no DESC"
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(artifact_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(infra)?;
        Ok(rows.into_iter().map(ArtifactVersion::from).collect())
    }
}

#[async_trait]
impl JobRepository for PgTx {
    async fn insert_job_if_absent(&mut self, job: &GenerationJob) -> Result<bool, DomainError> {
        let usage = job.usage;
        let result = sqlx::query(
            "INSERT INTO generation_jobs \
             (id, tenant_id, project_id, chapter_id, job_type, status, idempotency_key, \
              input_params, output_result, error_message, retry_count, progress, \
              reserved_tokens, prompt_tokens, completion_tokens, total_tokens, duration_ms, \
              scheduled_at, started_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22) \
             ON CONFLICT (project_id, job_type, idempotency_key) \
                 WHERE idempotency_key IS NOT NULL DO NOTHING",
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(job.project_id)
        .bind(job.chapter_id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.idempotency_key)
        .bind(&job.input_params)
        .bind(&job.output_result)
        .bind(&job.error_message)
        .bind(job.retry_count)
        .bind(job.progress)
        .bind(job.reserved_tokens)
        .bind(usage.map(|u| u.prompt_tokens))
        .bind(usage.map(|u| u.completion_tokens))
        .bind(usage.map(|u| u.total_tokens))
        .bind(job.duration_ms)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(GenerationJob::try_from)
            .transpose()
    }

    async fn lock_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(GenerationJob::try_from)
            .transpose()
    }

    async fn find_job_by_idempotency_key(
        &mut self,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>, DomainError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE tenant_id = $1 AND idempotency_key = $2 \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(tenant_id)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(GenerationJob::try_from)
            .transpose()
    }

    async fn find_job_by_scoped_key(
        &mut self,
        project_id: Uuid,
        job_type: JobType,
        key: &str,
    ) -> Result<Option<GenerationJob>, DomainError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE project_id = $1 AND job_type = $2 AND idempotency_key = $3"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(project_id)
            .bind(job_type.as_str())
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(GenerationJob::try_from)
            .transpose()
    }

    async fn update_job(&mut self, job: &GenerationJob) -> Result<(), DomainError> {
        let usage = job.usage;
        sqlx::query(
            "UPDATE generation_jobs SET \
             status = $2, output_result = $3, error_message = $4, retry_count = $5, \
             progress = $6, prompt_tokens = $7, completion_tokens = $8, total_tokens = $9, \
             duration_ms = $10, started_at = $11, completed_at = $12, updated_at = $13 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.output_result)
        .bind(&job.error_message)
        .bind(job.retry_count)
        .bind(job.progress)
        .bind(usage.map(|u| u.prompt_tokens))
        .bind(usage.map(|u| u.completion_tokens))
        .bind(usage.map(|u| u.total_tokens))
        .bind(job.duration_ms)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn list_jobs(
        &mut self,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, DomainError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE project_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(project_id)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(infra)?
            .into_iter()
            .map(GenerationJob::try_from)
            .collect()
    }

    async fn sum_job_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(CASE WHEN status IN ('pending', 'running') \
                                     THEN reserved_tokens \
                                     ELSE COALESCE(total_tokens, 0) END), 0)::BIGINT \
             FROM generation_jobs \
             WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(infra)
    }
}

#[async_trait]
impl UsageRepository for PgTx {
    async fn insert_usage_event(&mut self, event: &UsageEvent) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO llm_usage_events \
             (id, tenant_id, project_id, job_id, source, provider, model, total_tokens, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.project_id)
        .bind(event.job_id)
        .bind(&event.source)
        .bind(&event.provider)
        .bind(&event.model)
        .bind(event.total_tokens)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn sum_usage_event_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(total_tokens), 0)::BIGINT FROM llm_usage_events \
             WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(infra)
    }
}

#[async_trait]
impl CreationRepository for PgTx {
    async fn insert_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO project_creation_sessions \
             (id, tenant_id, user_id, stage, status, draft, created_project_id, \
              created_project_session_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(session.id)
        .bind(session.tenant_id)
        .bind(session.user_id)
        .bind(session.stage.as_str())
        .bind(session.status.as_str())
        .bind(&session.draft)
        .bind(session.created_project_id)
        .bind(session.created_project_session_id)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn lock_creation_session(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ProjectCreationSession>, DomainError> {
        let sql = format!(
            "SELECT {CREATION_SESSION_COLUMNS} FROM project_creation_sessions \
             WHERE id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, CreationSessionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?
            .map(ProjectCreationSession::try_from)
            .transpose()
    }

    async fn update_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE project_creation_sessions SET \
             stage = $2, status = $3, draft = $4, created_project_id = $5, \
             created_project_session_id = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(session.id)
        .bind(session.stage.as_str())
        .bind(session.status.as_str())
        .bind(&session.draft)
        .bind(session.created_project_id)
        .bind(session.created_project_session_id)
        .bind(session.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn insert_creation_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO project_creation_turns \
             (id, session_id, role, content, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(turn.id)
        .bind(turn.session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.metadata)
        .bind(turn.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn list_creation_turns(
        &mut self,
        session_id: Uuid,
    ) -> Result<Vec<ConversationTurn>, DomainError> {
        sqlx::query_as::<_, TurnRow>(
            "SELECT id, session_id, role, NULL::VARCHAR AS task, content, metadata, created_at \
             FROM project_creation_turns WHERE session_id = $1 ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(infra)?
        .into_iter()
        .map(ConversationTurn::try_from)
        .collect()
    }
}
