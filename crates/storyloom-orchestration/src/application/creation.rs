//! The guided project creation dialogue.
//!
//! Each turn has the same shape as a send: a short transaction records the
//! user turn and a running job, the model drafts outside any transaction,
//! and a second transaction applies the result. The model may ask to create
//! the project, but [`confirmation::evaluate`] decides whether that happens.

use std::sync::Arc;

use serde_json::json;
use storyloom_artifacts::domain::foundation::FoundationDetails;
use storyloom_core::capability::{CreationReply, CreationRequest, Generator};
use storyloom_core::clock::Clock;
use storyloom_core::command::Command;
use storyloom_core::error::{ConflictError, DomainError, NotFoundError};
use storyloom_core::model::{
    ArtifactType, ConversationSession, ConversationTurn, CreationAction, CreationStage,
    CreationStatus, JobStatus, JobType, Project, ProjectCreationSession, TokenUsage, TurnRole,
};
use storyloom_core::repository::{CreationRepository, Store};
use storyloom_jobs::application::ledger;
use storyloom_jobs::domain::lifecycle::NewJob;
use storyloom_quota::application::checker;
use storyloom_quota::application::usage_recorder::UsageRecorder;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::domain::commands::CreationMessage;
use crate::domain::confirmation;
use crate::domain::outcome::CreationOutcome;

const MISSING_TITLE_NOTE: &str =
    "The project was not created: the draft still needs a title.";

/// Drives creation dialogues to a new project.
#[derive(Clone)]
pub struct ProjectCreationStateMachine {
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
    usage: UsageRecorder,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

/// What the first transaction of a turn resolved.
struct OpenedTurn {
    session: ProjectCreationSession,
    history: Vec<ConversationTurn>,
    job_id: Uuid,
}

/// The model's reply after the confirmation gate.
struct GatedReply {
    reply: CreationReply,
    action: CreationAction,
    text: String,
}

impl ProjectCreationStateMachine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, generator: Arc<dyn Generator>) -> Self {
        Self {
            usage: UsageRecorder::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            generator,
            clock,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Handles one user turn, starting a new dialogue when the command names
    /// no session.
    ///
    /// # Errors
    ///
    /// - `DomainError::Quota` if the tenant is over its daily quota.
    /// - `DomainError::NotFound` for an unknown creation session.
    /// - `DomainError::Conflict` if the dialogue already created its project.
    /// - `DomainError::Validation` for an empty prompt.
    /// - `DomainError::Infrastructure` if drafting or persistence fails; the
    ///   job is marked failed.
    #[instrument(
        skip(self, command),
        fields(correlation_id = %command.correlation_id(), tenant_id = %command.tenant_id)
    )]
    pub async fn handle_message(
        &self,
        command: &CreationMessage,
    ) -> Result<CreationOutcome, DomainError> {
        info!(command_type = command.command_type(), "handling creation_message command");
        if command.prompt.trim().is_empty() {
            return Err(DomainError::Validation("prompt must not be empty".into()));
        }

        let opened = self.open_turn(command).await?;
        let stage_before = opened.session.stage;
        let request = CreationRequest {
            stage: stage_before,
            draft: opened.session.draft.clone(),
            prompt: command.prompt.clone(),
            history: opened.history,
            scope: command.scope.clone(),
        };
        let reply = match self.generator.draft_project(&request).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(opened.job_id, e.into(), None).await),
        };

        let usage = reply.usage;
        let gated = gate(stage_before, &command.prompt, reply);
        let session_id = opened.session.id;
        let result = self.close_turn(session_id, opened.job_id, gated).await;
        // Billed whether or not the turn commits.
        self.usage
            .record_generation(command.tenant_id, usage.total_tokens)
            .await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(opened.job_id, e, Some(usage)).await),
        }
    }

    async fn open_turn(&self, command: &CreationMessage) -> Result<OpenedTurn, DomainError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        checker::admit(&mut *tx, command.tenant_id, now).await?;

        let session = match command.creation_session_id {
            Some(id) => {
                let session = tx
                    .lock_creation_session(id)
                    .await?
                    .filter(|s| s.tenant_id == command.tenant_id)
                    .ok_or(NotFoundError::CreationSession(id))?;
                if session.status == CreationStatus::Completed {
                    return Err(ConflictError::CreationSessionClosed(id).into());
                }
                session
            }
            None => {
                let session = ProjectCreationSession {
                    id: Uuid::new_v4(),
                    tenant_id: command.tenant_id,
                    user_id: command.user_id,
                    stage: CreationStage::Gathering,
                    status: CreationStatus::Active,
                    draft: json!({}),
                    created_project_id: None,
                    created_project_session_id: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_creation_session(&session).await?;
                info!(creation_session_id = %session.id, "creation session started");
                session
            }
        };

        let history = tx.list_creation_turns(session.id).await?;
        tx.insert_creation_turn(&ConversationTurn {
            id: Uuid::new_v4(),
            session_id: session.id,
            role: TurnRole::User,
            task: None,
            content: command.prompt.clone(),
            metadata: json!({}),
            created_at: now,
        })
        .await?;

        let creation = ledger::create_job(
            &mut *tx,
            self.clock.as_ref(),
            NewJob {
                tenant_id: command.tenant_id,
                project_id: session.id,
                chapter_id: None,
                job_type: JobType::ProjectCreation,
                initial_status: JobStatus::Running,
                idempotency_key: None,
                input_params: json!({
                    "creation_session_id": session.id,
                    "stage": session.stage,
                    "scope": command.scope,
                }),
                reserved_tokens: self.config.token_reservation,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(OpenedTurn {
            session,
            history,
            job_id: creation.job.id,
        })
    }

    async fn close_turn(
        &self,
        session_id: Uuid,
        job_id: Uuid,
        gated: GatedReply,
    ) -> Result<CreationOutcome, DomainError> {
        let GatedReply {
            reply,
            mut action,
            mut text,
        } = gated;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut session = lock_open_session(&mut *tx, session_id).await?;

        // Only an actual project creation completes the dialogue.
        if let Some(next) = reply.next_stage {
            session.stage = session.stage.advance_to(next.min(CreationStage::Confirm));
        }
        if reply.draft.is_object() {
            session.draft = reply.draft.clone();
        }

        if action == CreationAction::CreateProject {
            match FoundationDetails::from_content(&session.draft) {
                Ok(details) => {
                    let project = Project {
                        id: Uuid::new_v4(),
                        tenant_id: session.tenant_id,
                        title: details.title,
                        description: details.description.unwrap_or_default(),
                        genre: details.genre.unwrap_or_default(),
                        created_at: now,
                        updated_at: now,
                    };
                    tx.insert_project(&project).await?;
                    let conversation = ConversationSession {
                        id: Uuid::new_v4(),
                        tenant_id: session.tenant_id,
                        project_id: project.id,
                        current_task: ArtifactType::Foundation,
                        created_at: now,
                        updated_at: now,
                    };
                    tx.insert_session(&conversation).await?;

                    session.stage = CreationStage::Completed;
                    session.status = CreationStatus::Completed;
                    session.created_project_id = Some(project.id);
                    session.created_project_session_id = Some(conversation.id);
                    info!(
                        creation_session_id = %session.id,
                        project_id = %project.id,
                        session_id = %conversation.id,
                        "project created from confirmed draft"
                    );
                }
                Err(e) => {
                    info!(creation_session_id = %session.id, reason = %e, "project creation downgraded");
                    action = CreationAction::ProposeCreation;
                    text = annotate(&text, MISSING_TITLE_NOTE);
                }
            }
        }
        session.updated_at = now;
        tx.update_creation_session(&session).await?;

        tx.insert_creation_turn(&ConversationTurn {
            id: Uuid::new_v4(),
            session_id: session.id,
            role: TurnRole::Assistant,
            task: None,
            content: text.clone(),
            metadata: json!({
                "job_id": job_id,
                "action": action,
                "requested_action": reply.action,
                "stage": session.stage,
                "usage": reply.usage,
                "project_id": session.created_project_id,
            }),
            created_at: now,
        })
        .await?;
        ledger::complete_job(
            &mut *tx,
            self.clock.as_ref(),
            job_id,
            json!({
                "action": action,
                "stage": session.stage,
                "project_id": session.created_project_id,
                "project_session_id": session.created_project_session_id,
            }),
            reply.usage,
        )
        .await?;
        tx.commit().await?;

        info!(
            %job_id,
            creation_session_id = %session.id,
            stage = session.stage.as_str(),
            "creation turn completed"
        );
        Ok(CreationOutcome {
            creation_session_id: session.id,
            stage: session.stage,
            status: session.status,
            action,
            reply: text,
            draft: session.draft,
            project_id: session.created_project_id,
            project_session_id: session.created_project_session_id,
            job_id,
            usage: reply.usage,
        })
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: DomainError,
        usage: Option<TokenUsage>,
    ) -> DomainError {
        ledger::record_failure(
            self.store.as_ref(),
            self.clock.as_ref(),
            job_id,
            &error.to_string(),
            usage,
        )
        .await;
        error
    }
}

async fn lock_open_session<R>(
    repo: &mut R,
    session_id: Uuid,
) -> Result<ProjectCreationSession, DomainError>
where
    R: CreationRepository + ?Sized,
{
    let session = repo
        .lock_creation_session(session_id)
        .await?
        .ok_or(NotFoundError::CreationSession(session_id))?;
    // Another turn may have created the project while the model ran.
    if session.status == CreationStatus::Completed {
        return Err(ConflictError::CreationSessionClosed(session_id).into());
    }
    Ok(session)
}

/// Downgrades an unconfirmed `CreateProject` to a proposal and tells the
/// user why.
fn gate(stage_before: CreationStage, prompt: &str, reply: CreationReply) -> GatedReply {
    let mut action = reply.action;
    let mut text = reply.reply.clone();
    if action == CreationAction::CreateProject {
        let verdict = confirmation::evaluate(stage_before, prompt);
        if let Some(note) = verdict.explanation() {
            info!(?verdict, "create_project action not confirmed by user");
            action = CreationAction::ProposeCreation;
            text = annotate(&text, note);
        }
    }
    GatedReply {
        reply,
        action,
        text,
    }
}

fn annotate(reply: &str, note: &str) -> String {
    if reply.trim().is_empty() {
        note.to_owned()
    } else {
        format!("{}\n\n{note}", reply.trim_end())
    }
}
