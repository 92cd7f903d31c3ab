//! The generation orchestrator and its synchronous entry points.

use std::sync::Arc;

use storyloom_artifacts::application::version_store;
use storyloom_context::application::manager::RollingContextManager;
use storyloom_context::domain::state::RollingContextConfig;
use storyloom_core::capability::{Cache, ConflictScanner, Generator, Indexer};
use storyloom_core::clock::Clock;
use storyloom_core::command::Command;
use storyloom_core::error::{DomainError, NotFoundError};
use storyloom_core::model::{GenerationJob, ProjectArtifact};
use storyloom_core::repository::Store;
use storyloom_jobs::application::ledger;
use storyloom_quota::application::usage_recorder::UsageRecorder;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::pipeline;
use crate::config::OrchestratorConfig;
use crate::domain::commands::{ActivateVersion, SendMessage};
use crate::domain::outcome::{GenerationMode, MessageOutcome};

/// External capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Capabilities {
    pub generator: Arc<dyn Generator>,
    pub scanner: Arc<dyn ConflictScanner>,
    pub indexer: Arc<dyn Indexer>,
    /// Backs rolling context.
    pub cache: Arc<dyn Cache>,
}

/// Runs generation requests against the store and the external capabilities.
///
/// Cheap to clone; every clone shares the same backends.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) scanner: Arc<dyn ConflictScanner>,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) context: RollingContextManager,
    pub(crate) usage: UsageRecorder,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: OrchestratorConfig,
}

impl GenerationOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, capabilities: Capabilities) -> Self {
        Self {
            usage: UsageRecorder::new(Arc::clone(&store), Arc::clone(&clock)),
            context: RollingContextManager::new(
                capabilities.cache,
                RollingContextConfig::default(),
            ),
            store,
            generator: capabilities.generator,
            scanner: capabilities.scanner,
            indexer: capabilities.indexer,
            clock,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Generates a new version of the session's current artifact from one
    /// user message.
    ///
    /// # Errors
    ///
    /// - `DomainError::Quota` if the tenant is over its daily quota; nothing
    ///   is written.
    /// - `DomainError::NotFound` for an unknown project or session, or one
    ///   owned by another tenant.
    /// - `DomainError::Validation` for an empty prompt or a bad branch key.
    /// - `DomainError::Infrastructure` if generation or persistence fails; the
    ///   user turn survives and the job is marked failed.
    #[instrument(
        skip(self, command),
        fields(
            correlation_id = %command.correlation_id(),
            session_id = %command.session_id,
            project_id = %command.project_id
        )
    )]
    pub async fn send_message(&self, command: &SendMessage) -> Result<MessageOutcome, DomainError> {
        info!(command_type = command.command_type(), "handling send_message command");

        let prepared = self.prepare(command).await?;
        let output = match self.generator.generate(&prepared.request).await {
            Ok(output) => output,
            Err(e) => {
                let err = DomainError::from(e);
                ledger::record_failure(
                    self.store.as_ref(),
                    self.clock.as_ref(),
                    prepared.job_id,
                    &err.to_string(),
                    None,
                )
                .await;
                return Err(err);
            }
        };

        let conflicts = self.scan_conflicts(&prepared, &output).await;
        let outcome = self
            .finish_message(&prepared, output, conflicts, GenerationMode::Sync)
            .await?;
        self.after_commit(prepared.tenant_id, prepared.project.id, &outcome)
            .await;
        Ok(outcome)
    }

    /// Points an artifact at one of its own versions. Rolling back is
    /// activating an older version; no content is copied.
    ///
    /// # Errors
    ///
    /// - `DomainError::NotFound` if the artifact or version does not exist or
    ///   the artifact belongs to another tenant.
    /// - `DomainError::Conflict` if the version belongs to another artifact.
    /// - `DomainError::Validation` if an activated foundation lacks a title.
    #[instrument(
        skip(self, command),
        fields(
            correlation_id = %command.correlation_id(),
            artifact_id = %command.artifact_id,
            version_id = %command.version_id
        )
    )]
    pub async fn activate_version(
        &self,
        command: &ActivateVersion,
    ) -> Result<ProjectArtifact, DomainError> {
        let mut tx = self.store.begin().await?;
        let artifact = tx
            .find_artifact(command.artifact_id)
            .await?
            .filter(|a| a.tenant_id == command.tenant_id)
            .ok_or(NotFoundError::Artifact(command.artifact_id))?;

        let artifact = version_store::set_active_version(
            &mut *tx,
            self.clock.as_ref(),
            artifact.id,
            command.version_id,
        )
        .await?;
        let version = tx
            .find_version(command.version_id)
            .await?
            .ok_or(NotFoundError::Version(command.version_id))?;
        pipeline::propagate_foundation(&mut *tx, self.clock.as_ref(), &artifact, &version.content)
            .await?;
        tx.commit().await?;

        info!(artifact_id = %artifact.id, version_no = version.version_no, "active version changed");
        self.spawn_index(&artifact, version.content);
        Ok(artifact)
    }

    /// Loads a job the tenant owns.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if the job does not exist or belongs to
    /// another tenant.
    pub async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<GenerationJob, DomainError> {
        let mut tx = self.store.begin().await?;
        let job = ledger::get_job(&mut *tx, job_id).await?;
        if job.tenant_id != tenant_id {
            return Err(NotFoundError::Job(job_id).into());
        }
        Ok(job)
    }

    /// Cancels a job the tenant owns. A job already running keeps generating,
    /// but its output will be discarded.
    ///
    /// # Errors
    ///
    /// - `DomainError::NotFound` if the job does not exist or belongs to
    ///   another tenant.
    /// - `DomainError::Conflict` if the job already completed or failed.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<GenerationJob, DomainError> {
        let mut tx = self.store.begin().await?;
        let owned = tx
            .find_job(job_id)
            .await?
            .is_some_and(|job| job.tenant_id == tenant_id);
        if !owned {
            return Err(NotFoundError::Job(job_id).into());
        }
        let job = ledger::cancel_job(&mut *tx, self.clock.as_ref(), job_id).await?;
        tx.commit().await?;
        info!(%job_id, "job cancelled");
        Ok(job)
    }

    /// Newest jobs of a project the tenant owns.
    ///
    /// # Errors
    ///
    /// - `DomainError::NotFound` if the project does not exist or belongs to
    ///   another tenant.
    /// - `DomainError::Validation` if `limit` is not positive.
    pub async fn list_jobs(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, DomainError> {
        let mut tx = self.store.begin().await?;
        pipeline::load_project(&mut *tx, tenant_id, project_id).await?;
        ledger::list_for_project(&mut *tx, project_id, limit).await
    }
}
