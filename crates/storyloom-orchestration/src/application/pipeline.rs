//! The two transactions that bracket a generation call.

use std::collections::BTreeMap;

use serde_json::json;
use storyloom_artifacts::application::queries;
use storyloom_artifacts::application::version_store::{self, BranchBase};
use storyloom_artifacts::domain::activation::decide_activation;
use storyloom_artifacts::domain::foundation::FoundationDetails;
use storyloom_context::domain::state::ContextKey;
use storyloom_core::capability::{Attachment, ConflictWarning, GenerationOutput, GenerationRequest};
use storyloom_core::clock::Clock;
use storyloom_core::error::{DomainError, NotFoundError};
use storyloom_core::model::{
    ArtifactType, ArtifactVersion, ConversationTurn, JobStatus, JobType, NewArtifactVersion,
    Project, ProjectArtifact, TurnRole, normalize_branch_key,
};
use storyloom_core::repository::{ArtifactRepository, ProjectRepository, StoreTx};
use storyloom_core::scope::RequestScope;
use storyloom_jobs::application::ledger;
use storyloom_jobs::domain::lifecycle::NewJob;
use storyloom_quota::application::checker;
use tracing::info;
use uuid::Uuid;

use crate::application::orchestrator::GenerationOrchestrator;
use crate::domain::commands::SendMessage;
use crate::domain::outcome::{GenerationMode, MessageOutcome};

/// Everything phase 1 resolved for the rest of a send.
pub(crate) struct Prepared {
    pub tenant_id: Uuid,
    pub project: Project,
    pub session_id: Uuid,
    pub task: ArtifactType,
    pub branch_key: String,
    pub user_turn_id: Uuid,
    pub job_id: Uuid,
    /// Active content of every artifact in the project.
    pub contents: BTreeMap<ArtifactType, serde_json::Value>,
    pub base: BranchBase,
    /// Explicit activation request; `None` applies the default policy.
    pub activate: Option<bool>,
    pub scan: bool,
    pub created_by: Option<Uuid>,
    pub request: GenerationRequest,
}

impl Prepared {
    /// Whether there is any canon worth scanning the new content against.
    pub fn has_prior_context(&self) -> bool {
        self.project.has_metadata() || !self.contents.is_empty() || self.base.content.is_some()
    }
}

/// A version about to be written in phase 2.
pub(crate) struct PendingVersion<'a> {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub artifact_type: ArtifactType,
    pub branch_key: &'a str,
    pub parent_version_id: Option<Uuid>,
    pub content: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub job_id: Uuid,
    /// Explicit activation request; `None` applies the default policy.
    pub activate: Option<bool>,
}

pub(crate) struct PersistedVersion {
    pub artifact: ProjectArtifact,
    pub version: ArtifactVersion,
    pub activated: bool,
}

/// Input of [`generation_request`].
pub(crate) struct RequestParts<'a> {
    pub project: &'a Project,
    pub artifact_type: ArtifactType,
    pub prompt: &'a str,
    pub attachments: &'a [Attachment],
    pub context_summary: String,
    pub recent_turns: String,
    pub contents: &'a BTreeMap<ArtifactType, serde_json::Value>,
    pub base: &'a BranchBase,
    pub scope: &'a RequestScope,
}

/// Builds what the generator sees: the always-visible artifacts plus the
/// base content of the target type.
pub(crate) fn generation_request(parts: RequestParts<'_>) -> GenerationRequest {
    let visible_artifacts = parts
        .contents
        .iter()
        .filter(|(ty, _)| ArtifactType::ALWAYS_VISIBLE.contains(ty))
        .map(|(ty, content)| (*ty, content.clone()))
        .collect();
    GenerationRequest {
        project_title: parts.project.title.clone(),
        project_description: parts.project.description.clone(),
        artifact_type: parts.artifact_type,
        prompt: parts.prompt.to_owned(),
        attachments: parts.attachments.to_vec(),
        context_summary: parts.context_summary,
        recent_turns: parts.recent_turns,
        visible_artifacts,
        base_content: parts.base.content.clone(),
        scope: parts.scope.clone(),
    }
}

/// Loads a project owned by `tenant_id`.
pub(crate) async fn load_project<R>(
    repo: &mut R,
    tenant_id: Uuid,
    project_id: Uuid,
) -> Result<Project, DomainError>
where
    R: ProjectRepository + ?Sized,
{
    Ok(repo
        .find_project(project_id)
        .await?
        .filter(|p| p.tenant_id == tenant_id)
        .ok_or(NotFoundError::Project(project_id))?)
}

/// The branch base of `artifact_type` in the project, or an empty base when
/// the artifact was never generated.
pub(crate) async fn branch_base<R>(
    repo: &mut R,
    project_id: Uuid,
    artifact_type: ArtifactType,
    branch_key: &str,
) -> Result<BranchBase, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    match repo.find_artifact_by_type(project_id, artifact_type).await? {
        Some(artifact) => version_store::resolve_branch_base(repo, artifact.id, branch_key).await,
        None => Ok(BranchBase::empty()),
    }
}

/// Copies the descriptive fields of an activated foundation onto its
/// project. Other artifact types are left alone.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the foundation lacks a title.
pub(crate) async fn propagate_foundation(
    tx: &mut dyn StoreTx,
    clock: &dyn Clock,
    artifact: &ProjectArtifact,
    content: &serde_json::Value,
) -> Result<(), DomainError> {
    if artifact.artifact_type != ArtifactType::Foundation {
        return Ok(());
    }
    let details = FoundationDetails::from_content(content)?;
    let project = tx
        .find_project(artifact.project_id)
        .await?
        .ok_or(NotFoundError::Project(artifact.project_id))?;
    tx.update_project_details(
        project.id,
        &details.title,
        details.description.as_deref().unwrap_or(&project.description),
        details.genre.as_deref().unwrap_or(&project.genre),
        clock.now(),
    )
    .await?;
    info!(project_id = %project.id, title = %details.title, "project details updated from foundation");
    Ok(())
}

/// Ensures the artifact, appends the version, and activates it when asked
/// or when the activation policy says so. Whether the branch is new is
/// decided under the artifact lock.
pub(crate) async fn persist_version(
    tx: &mut dyn StoreTx,
    clock: &dyn Clock,
    pending: PendingVersion<'_>,
) -> Result<PersistedVersion, DomainError> {
    let artifact = version_store::ensure_artifact(
        &mut *tx,
        clock,
        pending.tenant_id,
        pending.project_id,
        pending.artifact_type,
    )
    .await?;
    let first_on_branch =
        version_store::lock_branch(&mut *tx, artifact.id, pending.branch_key).await?;
    let activate = decide_activation(pending.activate, pending.branch_key, first_on_branch);
    let version = version_store::create_version(
        &mut *tx,
        clock,
        artifact.id,
        NewArtifactVersion {
            branch_key: pending.branch_key.to_owned(),
            parent_version_id: pending.parent_version_id,
            content: pending.content,
            created_by: pending.created_by,
            source_job_id: Some(pending.job_id),
        },
    )
    .await?;

    if !activate {
        return Ok(PersistedVersion {
            artifact,
            version,
            activated: false,
        });
    }
    let artifact = version_store::set_active_version(&mut *tx, clock, artifact.id, version.id).await?;
    propagate_foundation(tx, clock, &artifact, &version.content).await?;
    Ok(PersistedVersion {
        artifact,
        version,
        activated: true,
    })
}

impl GenerationOrchestrator {
    /// Phase 1: admit, record the user turn and a running job, and resolve
    /// what the generator needs. Nothing is written unless all of it succeeds.
    pub(crate) async fn prepare(&self, command: &SendMessage) -> Result<Prepared, DomainError> {
        let branch_key = normalize_branch_key(command.branch_key.as_deref())?;
        if command.prompt.trim().is_empty() {
            return Err(DomainError::Validation("prompt must not be empty".into()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        checker::admit(&mut *tx, command.tenant_id, now).await?;
        let project = load_project(&mut *tx, command.tenant_id, command.project_id).await?;
        let session = tx
            .lock_session(command.session_id)
            .await?
            .filter(|s| s.project_id == project.id)
            .ok_or(NotFoundError::Session(command.session_id))?;

        let mut task = session.current_task;
        if let Some(requested) = command.task.filter(|t| *t != task) {
            tx.update_session_task(session.id, requested, now).await?;
            task = requested;
        }

        let user_turn = ConversationTurn {
            id: Uuid::new_v4(),
            session_id: session.id,
            role: TurnRole::User,
            task: Some(task),
            content: command.prompt.clone(),
            metadata: json!({
                "attachments": command.attachments,
                "branch_key": branch_key,
            }),
            created_at: now,
        };
        tx.insert_turn(&user_turn).await?;

        let creation = ledger::create_job(
            &mut *tx,
            self.clock.as_ref(),
            NewJob {
                tenant_id: command.tenant_id,
                project_id: project.id,
                chapter_id: None,
                job_type: JobType::Conversation,
                initial_status: JobStatus::Running,
                idempotency_key: None,
                input_params: json!({
                    "session_id": session.id,
                    "task": task,
                    "branch_key": branch_key,
                    "scope": command.scope,
                }),
                reserved_tokens: self.config.token_reservation,
            },
        )
        .await?;

        let contents = queries::artifact_contents(&mut *tx, project.id).await?;
        let base = branch_base(&mut *tx, project.id, task, &branch_key).await?;
        tx.commit().await?;

        let job_id = creation.job.id;
        info!(%job_id, session_id = %session.id, %branch_key, %task, "send admitted");

        let snapshot = self
            .context
            .snapshot_and_append(
                &ContextKey {
                    tenant_id: command.tenant_id,
                    project_id: project.id,
                    session_id: session.id,
                    task,
                },
                &command.prompt,
            )
            .await;
        let request = generation_request(RequestParts {
            project: &project,
            artifact_type: task,
            prompt: &command.prompt,
            attachments: &command.attachments,
            context_summary: snapshot.summary,
            recent_turns: snapshot.recent_turns_text,
            contents: &contents,
            base: &base,
            scope: &command.scope,
        });

        Ok(Prepared {
            tenant_id: command.tenant_id,
            project,
            session_id: session.id,
            task,
            branch_key,
            user_turn_id: user_turn.id,
            job_id,
            contents,
            base,
            activate: command.activate,
            scan: command.enable_conflict_scan.unwrap_or(true),
            created_by: command.user_id,
            request,
        })
    }

    /// Phase 2. On failure the job is marked failed in its own transaction,
    /// the generation's tokens are still counted and billed, and the user
    /// turn from phase 1 stays.
    pub(crate) async fn finish_message(
        &self,
        prepared: &Prepared,
        output: GenerationOutput,
        conflicts: Vec<ConflictWarning>,
        mode: GenerationMode,
    ) -> Result<MessageOutcome, DomainError> {
        let usage = output.usage;
        match self.persist_message(prepared, output, conflicts, mode).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self
                .fail_after_generation(prepared.tenant_id, prepared.job_id, e, usage)
                .await),
        }
    }

    async fn persist_message(
        &self,
        prepared: &Prepared,
        output: GenerationOutput,
        conflicts: Vec<ConflictWarning>,
        mode: GenerationMode,
    ) -> Result<MessageOutcome, DomainError> {
        let clock = self.clock.as_ref();
        let mut tx = self.store.begin().await?;
        tx.lock_session(prepared.session_id)
            .await?
            .ok_or(NotFoundError::Session(prepared.session_id))?;

        let persisted = persist_version(
            &mut *tx,
            clock,
            PendingVersion {
                tenant_id: prepared.tenant_id,
                project_id: prepared.project.id,
                artifact_type: prepared.task,
                branch_key: &prepared.branch_key,
                parent_version_id: prepared.base.version_id,
                content: output.content.clone(),
                created_by: prepared.created_by,
                job_id: prepared.job_id,
                activate: prepared.activate,
            },
        )
        .await?;
        let PersistedVersion {
            artifact,
            version,
            activated,
        } = persisted;

        let assistant_turn = ConversationTurn {
            id: Uuid::new_v4(),
            session_id: prepared.session_id,
            role: TurnRole::Assistant,
            task: Some(prepared.task),
            content: output.raw_text.clone(),
            metadata: json!({
                "job_id": prepared.job_id,
                "artifact_id": artifact.id,
                "version_id": version.id,
                "version_no": version.version_no,
                "branch_key": version.branch_key,
                "activated": activated,
                "usage": output.usage,
                "conflicts": conflicts,
                "mode": mode,
            }),
            created_at: clock.now(),
        };
        tx.insert_turn(&assistant_turn).await?;

        ledger::complete_job(
            &mut *tx,
            clock,
            prepared.job_id,
            json!({
                "artifact_id": artifact.id,
                "version_id": version.id,
                "version_no": version.version_no,
                "branch_key": version.branch_key,
                "activated": activated,
            }),
            output.usage,
        )
        .await?;
        tx.commit().await?;

        info!(
            job_id = %prepared.job_id,
            session_id = %prepared.session_id,
            artifact_id = %artifact.id,
            version_no = version.version_no,
            branch_key = %version.branch_key,
            activated,
            "send completed"
        );
        Ok(MessageOutcome {
            job_id: prepared.job_id,
            session_id: prepared.session_id,
            user_turn_id: prepared.user_turn_id,
            assistant_turn_id: assistant_turn.id,
            artifact_id: artifact.id,
            artifact_type: prepared.task,
            version_id: version.id,
            version_no: version.version_no,
            branch_key: version.branch_key,
            activated,
            content: version.content,
            reply: output.raw_text,
            usage: output.usage,
            conflicts,
        })
    }
}
