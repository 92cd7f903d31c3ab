//! Job status transitions.
//!
//! `pending → running → {completed, failed, cancelled}`. Each transition
//! stamps the timestamps and metrics the ledger promises pollers.

use chrono::{DateTime, Utc};
use storyloom_core::clock::elapsed_ms;
use storyloom_core::error::{ConflictError, DomainError};
use storyloom_core::model::{GenerationJob, JobStatus, JobType, TokenUsage};
use uuid::Uuid;

/// Input for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub job_type: JobType,
    /// `Pending` for queued work, `Running` when the caller starts at once.
    pub initial_status: JobStatus,
    pub idempotency_key: Option<String>,
    pub input_params: serde_json::Value,
    /// Tokens counted against the daily quota until the job settles.
    pub reserved_tokens: i64,
}

impl NewJob {
    /// Builds the row, stamped at `now`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `initial_status` is neither
    /// pending nor running.
    pub fn into_job(self, now: DateTime<Utc>) -> Result<GenerationJob, DomainError> {
        if !self.initial_status.is_in_flight() {
            return Err(DomainError::Validation(format!(
                "a job cannot be created as {}",
                self.initial_status
            )));
        }
        let running = self.initial_status == JobStatus::Running;
        Ok(GenerationJob {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            chapter_id: self.chapter_id,
            job_type: self.job_type,
            status: self.initial_status,
            idempotency_key: self.idempotency_key,
            input_params: self.input_params,
            output_result: None,
            error_message: None,
            retry_count: 0,
            progress: 0,
            reserved_tokens: self.reserved_tokens.max(0),
            usage: None,
            duration_ms: None,
            scheduled_at: now,
            started_at: running.then_some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

fn transition(job: &mut GenerationJob, next: JobStatus) -> Result<(), DomainError> {
    if job.status.can_transition_to(next) {
        job.status = next;
        return Ok(());
    }
    if job.status.is_terminal() {
        return Err(ConflictError::JobTerminal {
            job_id: job.id,
            status: job.status,
        }
        .into());
    }
    Err(DomainError::Validation(format!(
        "job {} cannot move from {} to {next}",
        job.id, job.status
    )))
}

fn settle(job: &mut GenerationJob, now: DateTime<Utc>) {
    let started = job.started_at.unwrap_or(job.created_at);
    job.duration_ms = Some(elapsed_ms(started, now));
    job.completed_at = Some(now);
    job.reserved_tokens = 0;
    job.updated_at = now;
}

/// # Errors
///
/// Returns `ConflictError::JobTerminal` if the job already settled.
pub fn start(job: &mut GenerationJob, now: DateTime<Utc>) -> Result<(), DomainError> {
    transition(job, JobStatus::Running)?;
    job.started_at = Some(now);
    job.updated_at = now;
    Ok(())
}

/// # Errors
///
/// Returns `DomainError::Validation` if `progress` is outside `0..=100` or the
/// job is not running.
pub fn update_progress(
    job: &mut GenerationJob,
    progress: i32,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if !(0..=100).contains(&progress) {
        return Err(DomainError::Validation(format!(
            "progress must be within 0..=100, got {progress}"
        )));
    }
    if job.status != JobStatus::Running {
        return Err(DomainError::Validation(format!(
            "job {} is {}, progress only applies to running jobs",
            job.id, job.status
        )));
    }
    job.progress = progress;
    job.updated_at = now;
    Ok(())
}

/// # Errors
///
/// Returns `ConflictError::JobTerminal` if the job already settled.
pub fn complete(
    job: &mut GenerationJob,
    output: serde_json::Value,
    usage: TokenUsage,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    transition(job, JobStatus::Completed)?;
    job.output_result = Some(output);
    job.usage = Some(usage);
    job.progress = 100;
    settle(job, now);
    Ok(())
}

/// Records a failure. `usage` is what the generator already spent, if it
/// ran; it stays billable after the job fails. Returns `false` and leaves
/// the job untouched if it had already settled.
pub fn fail(
    job: &mut GenerationJob,
    message: &str,
    usage: Option<TokenUsage>,
    now: DateTime<Utc>,
) -> bool {
    if job.status.is_terminal() {
        return false;
    }
    job.status = JobStatus::Failed;
    job.error_message = Some(message.to_owned());
    job.usage = usage;
    settle(job, now);
    true
}

/// Cancels an unsettled job. Cancelling a cancelled job is a no-op that
/// returns `false`.
///
/// # Errors
///
/// Returns `ConflictError::JobTerminal` for completed or failed jobs.
pub fn cancel(job: &mut GenerationJob, now: DateTime<Utc>) -> Result<bool, DomainError> {
    if job.status == JobStatus::Cancelled {
        return Ok(false);
    }
    transition(job, JobStatus::Cancelled)?;
    settle(job, now);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;
    use storyloom_test_support::fixed_now;

    use super::*;

    fn new_job(status: JobStatus) -> GenerationJob {
        NewJob {
            tenant_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            chapter_id: None,
            job_type: JobType::ArtifactGeneration,
            initial_status: status,
            idempotency_key: None,
            input_params: json!({}),
            reserved_tokens: 2000,
        }
        .into_job(fixed_now())
        .unwrap()
    }

    #[test]
    fn test_running_job_is_stamped_as_started() {
        let job = new_job(JobStatus::Running);
        assert_eq!(job.started_at, Some(fixed_now()));
        assert_eq!(job.billable_tokens(), 2000);
    }

    #[test]
    fn test_job_cannot_be_created_settled() {
        let result = NewJob {
            tenant_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            chapter_id: None,
            job_type: JobType::Conversation,
            initial_status: JobStatus::Completed,
            idempotency_key: None,
            input_params: json!({}),
            reserved_tokens: 0,
        }
        .into_job(fixed_now());
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_complete_records_usage_duration_and_releases_reservation() {
        // Arrange
        let mut job = new_job(JobStatus::Running);
        let later = fixed_now() + Duration::milliseconds(1500);

        // Act
        complete(&mut job, json!({"ok": true}), TokenUsage::new(100, 50), later).unwrap();

        // Assert
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.duration_ms, Some(1500));
        assert_eq!(job.completed_at, Some(later));
        assert_eq!(job.progress, 100);
        assert_eq!(job.reserved_tokens, 0);
        assert_eq!(job.billable_tokens(), 150);
    }

    #[test]
    fn test_pending_job_cannot_complete() {
        let mut job = new_job(JobStatus::Pending);
        let result = complete(&mut job, json!({}), TokenUsage::default(), fixed_now());
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_fail_sets_message_and_timing_once() {
        // Arrange
        let mut job = new_job(JobStatus::Running);
        let later = fixed_now() + Duration::seconds(2);

        // Act
        let first = fail(&mut job, "model timed out", None, later);
        let second = fail(&mut job, "again", None, later + Duration::seconds(1));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(job.error_message.as_deref(), Some("model timed out"));
        assert_eq!(job.duration_ms, Some(2000));
        assert_eq!(job.completed_at, Some(later));
        assert_eq!(job.billable_tokens(), 0);
    }

    #[test]
    fn test_failure_after_generation_keeps_spent_tokens_billable() {
        // Arrange
        let mut job = new_job(JobStatus::Running);

        // Act
        let failed = fail(
            &mut job,
            "foundation must have a title",
            Some(TokenUsage::new(300, 600)),
            fixed_now(),
        );

        // Assert
        assert!(failed);
        assert_eq!(job.reserved_tokens, 0);
        assert_eq!(job.usage, Some(TokenUsage::new(300, 600)));
        assert_eq!(job.billable_tokens(), 900);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut job = new_job(JobStatus::Pending);
        assert!(cancel(&mut job, fixed_now()).unwrap());
        assert!(!cancel(&mut job, fixed_now()).unwrap());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_rejects_completed_and_failed_jobs() {
        for settled in [JobStatus::Completed, JobStatus::Failed] {
            let mut job = new_job(JobStatus::Running);
            job.status = settled;

            let result = cancel(&mut job, fixed_now());

            match result {
                Err(DomainError::Conflict(ConflictError::JobTerminal { status, .. })) => {
                    assert_eq!(status, settled);
                }
                other => panic!("expected JobTerminal, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_progress_is_bounded_and_running_only() {
        let mut job = new_job(JobStatus::Pending);
        assert!(update_progress(&mut job, 10, fixed_now()).is_err());

        start(&mut job, fixed_now()).unwrap();
        assert!(update_progress(&mut job, 101, fixed_now()).is_err());
        update_progress(&mut job, 40, fixed_now()).unwrap();
        assert_eq!(job.progress, 40);
    }
}
