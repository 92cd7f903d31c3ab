//! Fire-and-poll generation jobs.
//!
//! `submit_job` records a pending job and returns at once; `run_job` does the
//! work later, outside any request. Async jobs skip rolling context and
//! conflict scanning: they have no session to draw context from and no user
//! waiting for warnings.

use serde_json::json;
use storyloom_artifacts::application::queries;
use storyloom_artifacts::application::version_store::BranchBase;
use storyloom_core::capability::{GenerationOutput, GenerationRequest};
use storyloom_core::command::Command;
use storyloom_core::error::{DomainError, NotFoundError};
use storyloom_core::model::{
    GenerationJob, JobStatus, JobType, Project, normalize_branch_key,
};
use storyloom_jobs::application::ledger;
use storyloom_jobs::domain::lifecycle::NewJob;
use storyloom_quota::application::checker;
use storyloom_quota::application::usage_recorder::{UsageSource, UsageTarget};
use tracing::{Instrument, info, instrument, warn};
use uuid::Uuid;

use crate::application::orchestrator::GenerationOrchestrator;
use crate::application::pipeline::{
    self, PendingVersion, PersistedVersion, RequestParts, generation_request,
};
use crate::domain::commands::{JobInput, SubmitJob};
use crate::domain::outcome::JobSubmission;

/// What `run_job` resolved before calling the generator.
struct StartedJob {
    job: GenerationJob,
    input: JobInput,
    project: Project,
    branch_key: String,
    base: BranchBase,
    request: GenerationRequest,
}

impl GenerationOrchestrator {
    /// Queues a generation job.
    ///
    /// A replayed idempotency key returns the original job before any quota
    /// check, so retries of an accepted request never bounce on quota.
    ///
    /// # Errors
    ///
    /// - `DomainError::Conflict` if the key belongs to a job of another
    ///   project or type.
    /// - `DomainError::NotFound` for an unknown tenant or project.
    /// - `DomainError::Quota` if the balance is below the configured minimum
    ///   or the daily quota is spent.
    /// - `DomainError::Validation` for an empty prompt or a bad branch key.
    #[instrument(
        skip(self, command),
        fields(correlation_id = %command.correlation_id(), project_id = %command.project_id)
    )]
    pub async fn submit_job(&self, command: &SubmitJob) -> Result<JobSubmission, DomainError> {
        info!(command_type = command.command_type(), "handling submit_job command");

        let branch_key = normalize_branch_key(command.input.branch_key.as_deref())?;
        if command.input.prompt.trim().is_empty() {
            return Err(DomainError::Validation("prompt must not be empty".into()));
        }
        let key = command
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let mut tx = self.store.begin().await?;
        // Held until commit: a concurrent submit with the same key waits and
        // then sees this one's job.
        tx.lock_tenant(command.tenant_id)
            .await?
            .ok_or(NotFoundError::Tenant(command.tenant_id))?;
        if let Some(key) = key {
            let replayed = ledger::lookup_replay(
                &mut *tx,
                command.tenant_id,
                key,
                command.project_id,
                JobType::ArtifactGeneration,
            )
            .await?;
            if let Some(replayed) = replayed {
                return Ok(JobSubmission {
                    job: replayed.job,
                    replayed: true,
                });
            }
        }

        pipeline::load_project(&mut *tx, command.tenant_id, command.project_id).await?;
        checker::admit(&mut *tx, command.tenant_id, self.clock.now()).await?;
        checker::check_balance(&mut *tx, command.tenant_id, self.config.min_token_balance).await?;

        let input = JobInput {
            branch_key: Some(branch_key),
            ..command.input.clone()
        };
        let input_params = serde_json::to_value(&input)
            .map_err(|e| DomainError::Infrastructure(format!("job input serialization failed: {e}")))?;
        let creation = ledger::create_job(
            &mut *tx,
            self.clock.as_ref(),
            NewJob {
                tenant_id: command.tenant_id,
                project_id: command.project_id,
                chapter_id: command.chapter_id,
                job_type: JobType::ArtifactGeneration,
                initial_status: JobStatus::Pending,
                idempotency_key: key.map(str::to_owned),
                input_params,
                reserved_tokens: self.config.token_reservation,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(JobSubmission {
            replayed: !creation.created,
            job: creation.job,
        })
    }

    /// Runs a pending job to completion and returns its final row.
    ///
    /// If the job is cancelled while the generator runs, the output is
    /// discarded, its tokens are still billed, and the cancelled job is
    /// returned.
    ///
    /// # Errors
    ///
    /// - `DomainError::NotFound` for an unknown job.
    /// - `DomainError::Conflict` if the job already settled.
    /// - `DomainError::Validation` if the stored input is malformed.
    /// - `DomainError::Infrastructure` if generation or persistence fails.
    ///
    /// Every error after the job was found leaves it failed, except the
    /// conflict above.
    #[instrument(skip(self))]
    pub async fn run_job(&self, job_id: Uuid) -> Result<GenerationJob, DomainError> {
        let started = match self.start_job(job_id).await {
            Ok(started) => started,
            Err(e @ (DomainError::NotFound(_) | DomainError::Conflict(_))) => return Err(e),
            Err(e) => return Err(self.fail(job_id, e).await),
        };
        info!(%job_id, artifact_type = %started.input.artifact_type, "job started");

        let output = match self.generator.generate(&started.request).await {
            Ok(output) => output,
            Err(e) => return Err(self.fail(job_id, e.into()).await),
        };

        match self.finish_job(&started, &output).await {
            Ok(Some((job, persisted))) => {
                self.usage
                    .record_generation(job.tenant_id, output.usage.total_tokens)
                    .await;
                if persisted.activated {
                    self.spawn_index(&persisted.artifact, persisted.version.content);
                }
                Ok(job)
            }
            Ok(None) => self.discard_output(&started, &output).await,
            Err(e) => Err(self
                .fail_after_generation(started.job.tenant_id, job_id, e, output.usage)
                .await),
        }
    }

    /// Submits a job and runs it on a detached task. A replayed submission is
    /// not run again.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`submit_job`](Self::submit_job).
    pub async fn dispatch_job(&self, command: &SubmitJob) -> Result<JobSubmission, DomainError> {
        let submission = self.submit_job(command).await?;
        if submission.replayed {
            return Ok(submission);
        }

        let runner = self.clone();
        let job_id = submission.job.id;
        tokio::spawn(
            async move {
                if let Err(e) = runner.run_job(job_id).await {
                    warn!(%job_id, error = %e, "async job did not complete");
                }
            }
            .in_current_span(),
        );
        Ok(submission)
    }

    async fn start_job(&self, job_id: Uuid) -> Result<StartedJob, DomainError> {
        let mut tx = self.store.begin().await?;
        let job = ledger::start_job(&mut *tx, self.clock.as_ref(), job_id).await?;
        let input: JobInput = serde_json::from_value(job.input_params.clone())
            .map_err(|e| DomainError::Validation(format!("job {job_id} has malformed input: {e}")))?;
        let branch_key = normalize_branch_key(input.branch_key.as_deref())?;
        let project = tx
            .find_project(job.project_id)
            .await?
            .ok_or(NotFoundError::Project(job.project_id))?;
        let contents = queries::artifact_contents(&mut *tx, project.id).await?;
        let base =
            pipeline::branch_base(&mut *tx, project.id, input.artifact_type, &branch_key).await?;
        tx.commit().await?;

        let request = generation_request(RequestParts {
            project: &project,
            artifact_type: input.artifact_type,
            prompt: &input.prompt,
            attachments: &input.attachments,
            context_summary: String::new(),
            recent_turns: String::new(),
            contents: &contents,
            base: &base,
            scope: &input.scope,
        });
        Ok(StartedJob {
            job,
            input,
            project,
            branch_key,
            base,
            request,
        })
    }

    /// Writes the version and completes the job. Returns `None` without
    /// writing anything if the job was cancelled meanwhile.
    async fn finish_job(
        &self,
        started: &StartedJob,
        output: &GenerationOutput,
    ) -> Result<Option<(GenerationJob, PersistedVersion)>, DomainError> {
        let clock = self.clock.as_ref();
        let job_id = started.job.id;
        let mut tx = self.store.begin().await?;
        let current = tx.lock_job(job_id).await?.ok_or(NotFoundError::Job(job_id))?;
        if current.status == JobStatus::Cancelled {
            return Ok(None);
        }

        let persisted = pipeline::persist_version(
            &mut *tx,
            clock,
            PendingVersion {
                tenant_id: started.job.tenant_id,
                project_id: started.project.id,
                artifact_type: started.input.artifact_type,
                branch_key: &started.branch_key,
                parent_version_id: started.base.version_id,
                content: output.content.clone(),
                created_by: started.input.created_by,
                job_id,
                activate: started.input.activate,
            },
        )
        .await?;
        let job = ledger::complete_job(
            &mut *tx,
            clock,
            job_id,
            json!({
                "artifact_id": persisted.artifact.id,
                "version_id": persisted.version.id,
                "version_no": persisted.version.version_no,
                "branch_key": persisted.version.branch_key,
                "activated": persisted.activated,
                "content": output.content,
            }),
            output.usage,
        )
        .await?;
        tx.commit().await?;

        info!(
            %job_id,
            artifact_id = %persisted.artifact.id,
            version_no = persisted.version.version_no,
            branch_key = %persisted.version.branch_key,
            activated = persisted.activated,
            "job completed"
        );
        Ok(Some((job, persisted)))
    }

    async fn discard_output(
        &self,
        started: &StartedJob,
        output: &GenerationOutput,
    ) -> Result<GenerationJob, DomainError> {
        let job_id = started.job.id;
        info!(%job_id, "job cancelled during generation, output discarded");
        self.usage
            .record_auxiliary(
                UsageTarget {
                    tenant_id: started.job.tenant_id,
                    project_id: Some(started.project.id),
                    job_id: Some(job_id),
                    scope: &started.input.scope,
                },
                UsageSource::DiscardedGeneration,
                output.usage,
            )
            .await;
        let mut tx = self.store.begin().await?;
        ledger::get_job(&mut *tx, job_id).await
    }

    async fn fail(&self, job_id: Uuid, error: DomainError) -> DomainError {
        ledger::record_failure(
            self.store.as_ref(),
            self.clock.as_ref(),
            job_id,
            &error.to_string(),
            None,
        )
        .await;
        error
    }
}
