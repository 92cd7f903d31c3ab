//! Best-effort work around a generation: conflict scanning, billing, and
//! indexing. Failures here are logged and never reach the caller.

use storyloom_core::capability::{
    CapabilityError, ConflictWarning, GenerationOutput, IndexDocument, ScanContext,
};
use storyloom_core::error::DomainError;
use storyloom_core::model::{ProjectArtifact, TokenUsage};
use storyloom_jobs::application::ledger;
use storyloom_quota::application::usage_recorder::{UsageSource, UsageTarget};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::orchestrator::GenerationOrchestrator;
use crate::application::pipeline::Prepared;
use crate::domain::outcome::MessageOutcome;

impl GenerationOrchestrator {
    /// Scans new content against the project's canon. Returns no warnings
    /// when scanning is off, there is nothing to compare against, or the
    /// scanner fails.
    pub(crate) async fn scan_conflicts(
        &self,
        prepared: &Prepared,
        output: &GenerationOutput,
    ) -> Vec<ConflictWarning> {
        if !prepared.scan {
            return Vec::new();
        }
        if !prepared.has_prior_context() {
            debug!(job_id = %prepared.job_id, "no prior context, conflict scan skipped");
            return Vec::new();
        }

        let context = ScanContext {
            artifact_type: prepared.task,
            project_title: prepared.project.title.clone(),
            project_description: prepared.project.description.clone(),
            artifacts: prepared.contents.clone(),
        };
        let report = match self
            .scanner
            .scan(prepared.base.content.as_ref(), &output.content, &context)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = %prepared.job_id, error = %e, "conflict scan failed, continuing without warnings");
                return Vec::new();
            }
        };

        if let Some(usage) = report.usage {
            self.usage
                .record_auxiliary(
                    UsageTarget {
                        tenant_id: prepared.tenant_id,
                        project_id: Some(prepared.project.id),
                        job_id: Some(prepared.job_id),
                        scope: &prepared.request.scope,
                    },
                    UsageSource::ConflictScan,
                    usage,
                )
                .await;
        }
        report.warnings
    }

    /// Bills a committed send and indexes its version if it became active.
    pub(crate) async fn after_commit(&self, tenant_id: Uuid, project_id: Uuid, outcome: &MessageOutcome) {
        self.usage
            .record_generation(tenant_id, outcome.usage.total_tokens)
            .await;
        if outcome.activated {
            self.spawn_index_document(IndexDocument {
                tenant_id,
                project_id,
                artifact_type: outcome.artifact_type,
                artifact_id: outcome.artifact_id,
                content: outcome.content.clone(),
            });
        }
    }

    /// Fails a job whose generation already ran. The spent tokens stay on the
    /// job row for the daily quota and are billed like a completed send.
    pub(crate) async fn fail_after_generation(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        error: DomainError,
        usage: TokenUsage,
    ) -> DomainError {
        ledger::record_failure(
            self.store.as_ref(),
            self.clock.as_ref(),
            job_id,
            &error.to_string(),
            Some(usage),
        )
        .await;
        self.usage
            .record_generation(tenant_id, usage.total_tokens)
            .await;
        error
    }

    /// Indexes the active content of `artifact` in the background.
    pub(crate) fn spawn_index(&self, artifact: &ProjectArtifact, content: serde_json::Value) {
        self.spawn_index_document(IndexDocument {
            tenant_id: artifact.tenant_id,
            project_id: artifact.project_id,
            artifact_type: artifact.artifact_type,
            artifact_id: artifact.id,
            content,
        });
    }

    /// Runs on a detached task with its own deadline, so neither a client
    /// hanging up nor a slow index can affect the response.
    fn spawn_index_document(&self, document: IndexDocument) {
        let indexer = self.indexer.clone();
        let timeout = self.config.index_timeout;
        tokio::spawn(async move {
            let artifact_id = document.artifact_id;
            match tokio::time::timeout(timeout, indexer.index(&document)).await {
                Ok(Ok(())) => debug!(%artifact_id, "artifact indexed"),
                Ok(Err(CapabilityError::Disabled)) => {
                    debug!(%artifact_id, "indexing disabled, skipped");
                }
                Ok(Err(e)) => warn!(%artifact_id, error = %e, "indexing failed"),
                Err(_) => warn!(%artifact_id, ?timeout, "indexing timed out"),
            }
        });
    }
}
