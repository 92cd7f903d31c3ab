//! Job ledger operations.
//!
//! Everything except [`fail_job`] runs inside the caller's transaction.
//! `fail_job` opens its own so a failure can be recorded after the work's
//! transaction was rolled back, or when there never was one.

use storyloom_core::clock::Clock;
use storyloom_core::error::{ConflictError, DomainError, NotFoundError};
use storyloom_core::model::{GenerationJob, JobType, TokenUsage};
use storyloom_core::repository::{JobRepository, Store};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::lifecycle::{self, NewJob};

/// Outcome of [`create_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobCreation {
    pub job: GenerationJob,
    /// `false` when an idempotency key matched an existing job, which is
    /// returned unchanged.
    pub created: bool,
}

/// Creates a job, or returns the job that already owns its idempotency key.
///
/// A key replayed for the same project and job type returns the original
/// job. A lost insert race is resolved by re-reading the winner.
///
/// # Errors
///
/// Returns `ConflictError::IdempotencyKeyMismatch` when the key belongs to a
/// job of another project or type.
pub async fn create_job<R>(
    repo: &mut R,
    clock: &dyn Clock,
    new: NewJob,
) -> Result<JobCreation, DomainError>
where
    R: JobRepository + ?Sized,
{
    let tenant_id = new.tenant_id;
    let (project_id, job_type) = (new.project_id, new.job_type);
    let key = new.idempotency_key.clone();

    if let Some(key) = key.as_deref() {
        if let Some(replayed) = lookup_replay(repo, tenant_id, key, project_id, job_type).await? {
            return Ok(replayed);
        }
    }

    let job = new.into_job(clock.now())?;
    if repo.insert_job_if_absent(&job).await? {
        info!(job_id = %job.id, %project_id, %job_type, status = %job.status, "job created");
        return Ok(JobCreation { job, created: true });
    }

    let Some(key) = key.as_deref() else {
        return Err(DomainError::Infrastructure(format!(
            "job {} was rejected without an idempotency key",
            job.id
        )));
    };
    let winner = repo
        .find_job_by_scoped_key(project_id, job_type, key)
        .await?
        .ok_or_else(|| {
            DomainError::Infrastructure(format!(
                "job with idempotency key {key} vanished after insert conflict"
            ))
        })?;
    replay(winner, key, project_id, job_type)
}

/// Returns the job already registered under `key` for the same project and
/// job type, if any. An exact match always wins over jobs of other projects
/// or types that happen to share the key.
///
/// # Errors
///
/// Returns `ConflictError::IdempotencyKeyMismatch` when the tenant used the
/// key only for a job of another project or type.
pub async fn lookup_replay<R>(
    repo: &mut R,
    tenant_id: Uuid,
    key: &str,
    project_id: Uuid,
    job_type: JobType,
) -> Result<Option<JobCreation>, DomainError>
where
    R: JobRepository + ?Sized,
{
    if let Some(existing) = repo.find_job_by_scoped_key(project_id, job_type, key).await? {
        return replay(existing, key, project_id, job_type).map(Some);
    }
    match repo.find_job_by_idempotency_key(tenant_id, key).await? {
        Some(existing) => replay(existing, key, project_id, job_type).map(Some),
        None => Ok(None),
    }
}

fn replay(
    existing: GenerationJob,
    key: &str,
    project_id: Uuid,
    job_type: JobType,
) -> Result<JobCreation, DomainError> {
    if existing.project_id != project_id || existing.job_type != job_type {
        return Err(ConflictError::IdempotencyKeyMismatch {
            key: key.to_owned(),
            job_id: existing.id,
        }
        .into());
    }
    info!(job_id = %existing.id, idempotency_key = key, "idempotent replay");
    Ok(JobCreation {
        job: existing,
        created: false,
    })
}

async fn locked<R>(repo: &mut R, job_id: Uuid) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    Ok(repo
        .lock_job(job_id)
        .await?
        .ok_or(NotFoundError::Job(job_id))?)
}

/// Moves a pending job to running.
///
/// # Errors
///
/// Returns `NotFoundError::Job` or `ConflictError::JobTerminal`.
pub async fn start_job<R>(
    repo: &mut R,
    clock: &dyn Clock,
    job_id: Uuid,
) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    let mut job = locked(repo, job_id).await?;
    lifecycle::start(&mut job, clock.now())?;
    repo.update_job(&job).await?;
    info!(%job_id, "job started");
    Ok(job)
}

/// # Errors
///
/// Returns `NotFoundError::Job`, or `DomainError::Validation` for an
/// out-of-range value or a job that is not running.
pub async fn update_progress<R>(
    repo: &mut R,
    clock: &dyn Clock,
    job_id: Uuid,
    progress: i32,
) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    let mut job = locked(repo, job_id).await?;
    lifecycle::update_progress(&mut job, progress, clock.now())?;
    repo.update_job(&job).await?;
    Ok(job)
}

/// Settles a running job with its output and token usage.
///
/// # Errors
///
/// Returns `NotFoundError::Job` or `ConflictError::JobTerminal`.
pub async fn complete_job<R>(
    repo: &mut R,
    clock: &dyn Clock,
    job_id: Uuid,
    output: serde_json::Value,
    usage: TokenUsage,
) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    let mut job = locked(repo, job_id).await?;
    lifecycle::complete(&mut job, output, usage, clock.now())?;
    repo.update_job(&job).await?;
    info!(
        %job_id,
        total_tokens = usage.total_tokens,
        duration_ms = job.duration_ms,
        "job completed"
    );
    Ok(job)
}

/// Marks a job failed in a transaction of its own. Jobs that already settled
/// are left as they are.
///
/// Pass the generator's `usage` when the failure came after a successful
/// generation call, so the spent tokens keep counting toward the daily
/// quota.
///
/// # Errors
///
/// Returns `NotFoundError::Job`, or `DomainError::Infrastructure` if the
/// store is unreachable.
pub async fn fail_job(
    store: &dyn Store,
    clock: &dyn Clock,
    job_id: Uuid,
    message: &str,
    usage: Option<TokenUsage>,
) -> Result<GenerationJob, DomainError> {
    let mut tx = store.begin().await?;
    let mut job = locked(&mut *tx, job_id).await?;
    if !lifecycle::fail(&mut job, message, usage, clock.now()) {
        tx.rollback().await?;
        return Ok(job);
    }
    tx.update_job(&job).await?;
    tx.commit().await?;
    warn!(
        %job_id,
        error = message,
        total_tokens = usage.map_or(0, |u| u.total_tokens),
        "job failed"
    );
    Ok(job)
}

/// Like [`fail_job`], for paths that are already failing: logs instead of
/// returning a second error.
pub async fn record_failure(
    store: &dyn Store,
    clock: &dyn Clock,
    job_id: Uuid,
    message: &str,
    usage: Option<TokenUsage>,
) {
    if let Err(e) = fail_job(store, clock, job_id, message, usage).await {
        warn!(%job_id, error = %e, "could not record job failure");
    }
}

/// Cancels a job. Cancelling twice succeeds both times.
///
/// # Errors
///
/// Returns `NotFoundError::Job`, or `ConflictError::JobTerminal` for a
/// completed or failed job.
pub async fn cancel_job<R>(
    repo: &mut R,
    clock: &dyn Clock,
    job_id: Uuid,
) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    let mut job = locked(repo, job_id).await?;
    if lifecycle::cancel(&mut job, clock.now())? {
        repo.update_job(&job).await?;
        info!(%job_id, "job cancelled");
    }
    Ok(job)
}

/// # Errors
///
/// Returns `NotFoundError::Job` for an unknown id.
pub async fn get_job<R>(repo: &mut R, job_id: Uuid) -> Result<GenerationJob, DomainError>
where
    R: JobRepository + ?Sized,
{
    Ok(repo
        .find_job(job_id)
        .await?
        .ok_or(NotFoundError::Job(job_id))?)
}

/// # Errors
///
/// Returns `DomainError::Infrastructure` if the store fails.
pub async fn find_by_idempotency_key<R>(
    repo: &mut R,
    tenant_id: Uuid,
    key: &str,
) -> Result<Option<GenerationJob>, DomainError>
where
    R: JobRepository + ?Sized,
{
    repo.find_job_by_idempotency_key(tenant_id, key).await
}

/// Newest jobs of a project first, at most `limit`.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a non-positive limit.
pub async fn list_for_project<R>(
    repo: &mut R,
    project_id: Uuid,
    limit: i64,
) -> Result<Vec<GenerationJob>, DomainError>
where
    R: JobRepository + ?Sized,
{
    if limit <= 0 {
        return Err(DomainError::Validation(format!(
            "limit must be positive, got {limit}"
        )));
    }
    repo.list_jobs(project_id, limit).await
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use storyloom_core::model::JobStatus;
    use storyloom_test_support::{FailingStore, FixedClock, InMemoryStore, fixed_now};

    use super::*;

    /// Job rows where another transaction commits `rival` between the
    /// caller's replay lookup and its insert.
    #[derive(Default)]
    struct RacingJobs {
        jobs: Vec<GenerationJob>,
        rival: Option<GenerationJob>,
    }

    #[async_trait]
    impl JobRepository for RacingJobs {
        async fn insert_job_if_absent(&mut self, job: &GenerationJob) -> Result<bool, DomainError> {
            if let Some(rival) = self.rival.take() {
                self.jobs.push(rival);
                return Ok(false);
            }
            self.jobs.push(job.clone());
            Ok(true)
        }

        async fn find_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
            Ok(self.jobs.iter().find(|j| j.id == id).cloned())
        }

        async fn lock_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
            self.find_job(id).await
        }

        async fn find_job_by_idempotency_key(
            &mut self,
            tenant_id: Uuid,
            key: &str,
        ) -> Result<Option<GenerationJob>, DomainError> {
            Ok(self
                .jobs
                .iter()
                .find(|j| j.tenant_id == tenant_id && j.idempotency_key.as_deref() == Some(key))
                .cloned())
        }

        async fn find_job_by_scoped_key(
            &mut self,
            project_id: Uuid,
            job_type: JobType,
            key: &str,
        ) -> Result<Option<GenerationJob>, DomainError> {
            Ok(self
                .jobs
                .iter()
                .find(|j| {
                    j.project_id == project_id
                        && j.job_type == job_type
                        && j.idempotency_key.as_deref() == Some(key)
                })
                .cloned())
        }

        async fn update_job(&mut self, _job: &GenerationJob) -> Result<(), DomainError> {
            unimplemented!("not used by create_job")
        }

        async fn list_jobs(
            &mut self,
            _project_id: Uuid,
            _limit: i64,
        ) -> Result<Vec<GenerationJob>, DomainError> {
            unimplemented!("not used by create_job")
        }

        async fn sum_job_tokens(
            &mut self,
            _tenant_id: Uuid,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<i64, DomainError> {
            unimplemented!("not used by create_job")
        }
    }

    fn new_job(project_id: Uuid, job_type: JobType, key: Option<&str>) -> NewJob {
        NewJob {
            tenant_id: Uuid::nil(),
            project_id,
            chapter_id: None,
            job_type,
            initial_status: JobStatus::Pending,
            idempotency_key: key.map(str::to_owned),
            input_params: json!({ "prompt": "a lighthouse" }),
            reserved_tokens: 2000,
        }
    }

    async fn committed_job(store: &InMemoryStore, status: JobStatus) -> GenerationJob {
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let created = create_job(&mut *tx, &clock, new_job(Uuid::new_v4(), JobType::Conversation, None))
            .await
            .unwrap();
        let mut job = created.job;
        if status != JobStatus::Pending {
            job = start_job(&mut *tx, &clock, job.id).await.unwrap();
        }
        tx.commit().await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_replayed_key_returns_original_job() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let project_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let first = create_job(&mut *tx, &clock, new_job(project_id, JobType::ArtifactGeneration, Some("k-1")))
            .await
            .unwrap();

        // Act
        let second = create_job(&mut *tx, &clock, new_job(project_id, JobType::ArtifactGeneration, Some("k-1")))
            .await
            .unwrap();

        // Assert
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.job.id, first.job.id);
        assert_eq!(tx.list_jobs(project_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_insert_race_returns_the_winner() {
        // Arrange
        let clock = FixedClock::default();
        let project_id = Uuid::new_v4();
        let winner = new_job(project_id, JobType::ArtifactGeneration, Some("k-race"))
            .into_job(fixed_now())
            .unwrap();
        let mut repo = RacingJobs {
            rival: Some(winner.clone()),
            ..RacingJobs::default()
        };

        // Act
        let creation = create_job(
            &mut repo,
            &clock,
            new_job(project_id, JobType::ArtifactGeneration, Some("k-race")),
        )
        .await
        .unwrap();

        // Assert
        assert!(!creation.created);
        assert_eq!(creation.job.id, winner.id);
        assert_eq!(repo.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_exact_key_match_wins_over_newer_job_of_another_project() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let project_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let own = create_job(&mut *tx, &clock, new_job(project_id, JobType::ArtifactGeneration, Some("k-5")))
            .await
            .unwrap();
        let foreign = new_job(Uuid::new_v4(), JobType::ArtifactGeneration, Some("k-5"))
            .into_job(fixed_now() + Duration::seconds(1))
            .unwrap();
        assert!(tx.insert_job_if_absent(&foreign).await.unwrap());

        // Act
        let replayed = lookup_replay(&mut *tx, Uuid::nil(), "k-5", project_id, JobType::ArtifactGeneration)
            .await
            .unwrap()
            .unwrap();

        // Assert
        assert!(!replayed.created);
        assert_eq!(replayed.job.id, own.job.id);
    }

    #[tokio::test]
    async fn test_key_reused_for_other_job_type_conflicts() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let project_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let first = create_job(&mut *tx, &clock, new_job(project_id, JobType::ArtifactGeneration, Some("k-2")))
            .await
            .unwrap();

        // Act
        let result = create_job(&mut *tx, &clock, new_job(project_id, JobType::Conversation, Some("k-2"))).await;

        // Assert
        match result {
            Err(DomainError::Conflict(ConflictError::IdempotencyKeyMismatch { key, job_id })) => {
                assert_eq!(key, "k-2");
                assert_eq!(job_id, first.job.id);
            }
            other => panic!("expected IdempotencyKeyMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_jobs_without_key_are_never_deduplicated() {
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let project_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        for _ in 0..2 {
            let created = create_job(&mut *tx, &clock, new_job(project_id, JobType::Conversation, None))
                .await
                .unwrap();
            assert!(created.created);
        }

        assert_eq!(tx.list_jobs(project_id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_job_commits_on_its_own() {
        // Arrange
        let store = InMemoryStore::new();
        let job = committed_job(&store, JobStatus::Running).await;
        let clock = FixedClock(fixed_now() + Duration::seconds(3));

        // Act
        let failed = fail_job(&store, &clock, job.id, "provider returned 502", None)
            .await
            .unwrap();

        // Assert
        assert_eq!(failed.status, JobStatus::Failed);
        let state = store.snapshot().await;
        let stored = state.jobs.iter().find(|j| j.id == job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("provider returned 502"));
        assert_eq!(stored.duration_ms, Some(3000));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_job_keeps_usage_of_finished_generation() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let job = committed_job(&store, JobStatus::Running).await;

        // Act
        let failed = fail_job(
            &store,
            &clock,
            job.id,
            "foundation must have a title",
            Some(TokenUsage::new(400, 500)),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(failed.usage, Some(TokenUsage::new(400, 500)));
        let mut tx = store.begin().await.unwrap();
        let counted = tx
            .sum_job_tokens(Uuid::nil(), fixed_now() - Duration::days(1), fixed_now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(counted, 900);
    }

    #[tokio::test]
    async fn test_fail_job_leaves_settled_job_alone() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let job = committed_job(&store, JobStatus::Running).await;
        {
            let mut tx = store.begin().await.unwrap();
            complete_job(&mut *tx, &clock, job.id, json!({}), TokenUsage::new(1, 1))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        // Act
        let after = fail_job(&store, &clock, job.id, "late failure", None)
            .await
            .unwrap();

        // Assert
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.error_message, None);
    }

    #[tokio::test]
    async fn test_record_failure_swallows_store_errors() {
        record_failure(&FailingStore, &FixedClock::default(), Uuid::new_v4(), "boom", None).await;
    }

    #[tokio::test]
    async fn test_cancel_twice_then_complete_is_rejected() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let job = committed_job(&store, JobStatus::Running).await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let first = cancel_job(&mut *tx, &clock, job.id).await.unwrap();
        let second = cancel_job(&mut *tx, &clock, job.id).await.unwrap();
        let complete = complete_job(&mut *tx, &clock, job.id, json!({}), TokenUsage::default()).await;

        // Assert
        assert_eq!(first.status, JobStatus::Cancelled);
        assert_eq!(second.status, JobStatus::Cancelled);
        assert!(matches!(
            complete,
            Err(DomainError::Conflict(ConflictError::JobTerminal {
                status: JobStatus::Cancelled,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_get_job_and_list_for_project() {
        // Arrange
        let store = InMemoryStore::new();
        let job = committed_job(&store, JobStatus::Pending).await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let fetched = get_job(&mut *tx, job.id).await.unwrap();
        let listed = list_for_project(&mut *tx, job.project_id, 5).await.unwrap();
        let missing = get_job(&mut *tx, Uuid::new_v4()).await;
        let bad_limit = list_for_project(&mut *tx, job.project_id, 0).await;

        // Assert
        assert_eq!(fetched.id, job.id);
        assert_eq!(listed.len(), 1);
        assert!(matches!(missing, Err(DomainError::NotFound(NotFoundError::Job(_)))));
        assert!(matches!(bad_limit, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_find_by_idempotency_key_is_tenant_scoped() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        create_job(&mut *tx, &clock, new_job(Uuid::new_v4(), JobType::Conversation, Some("k-3")))
            .await
            .unwrap();

        // Act
        let own = find_by_idempotency_key(&mut *tx, Uuid::nil(), "k-3").await.unwrap();
        let other = find_by_idempotency_key(&mut *tx, Uuid::new_v4(), "k-3").await.unwrap();

        // Assert
        assert!(own.is_some());
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_progress_updates_running_job() {
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let job = committed_job(&store, JobStatus::Running).await;
        let mut tx = store.begin().await.unwrap();

        let updated = update_progress(&mut *tx, &clock, job.id, 55).await.unwrap();

        assert_eq!(updated.progress, 55);
    }
}
