//! In-memory transactional store.
//!
//! `begin` takes an exclusive lock on the whole state and hands the
//! transaction a working copy. `commit` publishes the copy; dropping the
//! transaction discards it. Every transaction is therefore serialized, which
//! is stricter than per-row locking but gives the same "second writer waits
//! for the first to finish" behavior tests depend on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storyloom_core::error::DomainError;
use storyloom_core::model::{
    ArtifactType, ArtifactVersion, ConversationSession, ConversationTurn, GenerationJob, JobType,
    Project, ProjectArtifact, ProjectCreationSession, Tenant, UsageEvent,
};
use storyloom_core::repository::{
    ArtifactRepository, CreationRepository, JobRepository, ProjectRepository, SessionRepository,
    Store, StoreTx, TenantRepository, UsageRepository,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Every table of the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub tenants: HashMap<Uuid, Tenant>,
    pub projects: HashMap<Uuid, Project>,
    pub sessions: HashMap<Uuid, ConversationSession>,
    pub turns: Vec<ConversationTurn>,
    pub artifacts: HashMap<Uuid, ProjectArtifact>,
    pub versions: Vec<ArtifactVersion>,
    pub jobs: Vec<GenerationJob>,
    pub usage_events: Vec<UsageEvent>,
    pub creation_sessions: HashMap<Uuid, ProjectCreationSession>,
    pub creation_turns: Vec<ConversationTurn>,
}

/// A `Store` backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_version_inserts: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the committed state. Must not be called while a
    /// transaction is open on the same task.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Applies `seed` to the committed state.
    pub async fn seed(&self, seed: impl FnOnce(&mut MemoryState)) {
        seed(&mut *self.state.lock().await);
    }

    /// Makes every subsequent `insert_version` fail with an infrastructure
    /// error, to exercise rollback paths.
    pub fn fail_version_inserts(&self) {
        self.fail_version_inserts.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DomainError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_version_inserts: self.fail_version_inserts.load(Ordering::SeqCst),
        }))
    }
}

/// A store whose transactions can never be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_version_inserts: bool,
}

fn in_window(at: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    at >= from && at < to
}

#[async_trait]
impl TenantRepository for MemoryTx {
    async fn find_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError> {
        Ok(self.working.tenants.get(&id).cloned())
    }

    async fn lock_tenant(&mut self, id: Uuid) -> Result<Option<Tenant>, DomainError> {
        Ok(self.working.tenants.get(&id).cloned())
    }

    async fn adjust_token_balance(&mut self, id: Uuid, delta: i64) -> Result<(), DomainError> {
        if let Some(tenant) = self.working.tenants.get_mut(&id) {
            tenant.token_balance += delta;
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for MemoryTx {
    async fn find_project(&mut self, id: Uuid) -> Result<Option<Project>, DomainError> {
        Ok(self.working.projects.get(&id).cloned())
    }

    async fn insert_project(&mut self, project: &Project) -> Result<(), DomainError> {
        self.working.projects.insert(project.id, project.clone());
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
        if let Some(project) = self.working.projects.get_mut(&id) {
            title.clone_into(&mut project.title);
            description.clone_into(&mut project.description);
            genre.clone_into(&mut project.genre);
            project.updated_at = updated_at;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryTx {
    async fn lock_session(&mut self, id: Uuid) -> Result<Option<ConversationSession>, DomainError> {
        Ok(self.working.sessions.get(&id).cloned())
    }

    async fn insert_session(&mut self, session: &ConversationSession) -> Result<(), DomainError> {
        self.working.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session_task(
        &mut self,
        id: Uuid,
        task: ArtifactType,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if let Some(session) = self.working.sessions.get_mut(&id) {
            session.current_task = task;
            session.updated_at = updated_at;
        }
        Ok(())
    }

    async fn insert_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError> {
        self.working.turns.push(turn.clone());
        Ok(())
    }

    async fn list_turns(&mut self, session_id: Uuid) -> Result<Vec<ConversationTurn>, DomainError> {
        Ok(self
            .working
            .turns
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ArtifactRepository for MemoryTx {
    async fn insert_artifact_if_absent(
        &mut self,
        artifact: &ProjectArtifact,
    ) -> Result<bool, DomainError> {
        let exists = self.working.artifacts.values().any(|a| {
            a.project_id == artifact.project_id && a.artifact_type == artifact.artifact_type
        });
        if exists {
            return Ok(false);
        }
        self.working.artifacts.insert(artifact.id, artifact.clone());
        Ok(true)
    }

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError> {
        Ok(self.working.artifacts.get(&id).cloned())
    }

    async fn lock_artifact(&mut self, id: Uuid) -> Result<Option<ProjectArtifact>, DomainError> {
        Ok(self.working.artifacts.get(&id).cloned())
    }

    async fn find_artifact_by_type(
        &mut self,
        project_id: Uuid,
        artifact_type: ArtifactType,
    ) -> Result<Option<ProjectArtifact>, DomainError> {
        Ok(self
            .working
            .artifacts
            .values()
            .find(|a| a.project_id == project_id && a.artifact_type == artifact_type)
            .cloned())
    }

    async fn list_artifacts(
        &mut self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectArtifact>, DomainError> {
        let mut artifacts: Vec<_> = self
            .working
            .artifacts
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| a.artifact_type);
        Ok(artifacts)
    }

    async fn max_version_no(&mut self, artifact_id: Uuid) -> Result<i32, DomainError> {
        Ok(self
            .working
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
            .map(|v| v.version_no)
            .max()
            .unwrap_or(0))
    }

    async fn latest_version_on_branch(
        &mut self,
        artifact_id: Uuid,
        branch_key: &str,
    ) -> Result<Option<ArtifactVersion>, DomainError> {
        Ok(self
            .working
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id && v.branch_key == branch_key)
            .max_by_key(|v| v.version_no)
            .cloned())
    }

    async fn find_version(&mut self, id: Uuid) -> Result<Option<ArtifactVersion>, DomainError> {
        Ok(self.working.versions.iter().find(|v| v.id == id).cloned())
    }

    async fn insert_version(&mut self, version: &ArtifactVersion) -> Result<(), DomainError> {
        if self.fail_version_inserts {
            return Err(DomainError::Infrastructure("disk full".into()));
        }
        let duplicate = self
            .working
            .versions
            .iter()
            .any(|v| v.artifact_id == version.artifact_id && v.version_no == version.version_no);
        if duplicate {
            return Err(DomainError::Infrastructure(format!(
                "duplicate version_no {} for artifact {}",
                version.version_no, version.artifact_id
            )));
        }
        self.working.versions.push(version.clone());
        Ok(())
    }

    async fn set_active_version(
        &mut self,
        artifact_id: Uuid,
        version_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if let Some(artifact) = self.working.artifacts.get_mut(&artifact_id) {
            artifact.active_version_id = Some(version_id);
            artifact.updated_at = updated_at;
        }
        Ok(())
    }

    async fn list_versions(
        &mut self,
        artifact_id: Uuid,
        branch_key: Option<&str>,
    ) -> Result<Vec<ArtifactVersion>, DomainError> {
        let mut versions: Vec<_> = self
            .working
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
            .filter(|v| branch_key.is_none_or(|b| v.branch_key == b))
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_no);
        Ok(versions)
    }

    async fn branch_heads(
        &mut self,
        artifact_id: Uuid,
    ) -> Result<Vec<ArtifactVersion>, DomainError> {
        let mut heads: BTreeMap<String, ArtifactVersion> = BTreeMap::new();
        for version in self
            .working
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
        {
            let newer = heads
                .get(&version.branch_key)
                .is_none_or(|head| version.version_no > head.version_no);
            if newer {
                heads.insert(version.branch_key.clone(), version.clone());
            }
        }
        Ok(heads.into_values().collect())
    }
}

#[async_trait]
impl JobRepository for MemoryTx {
    async fn insert_job_if_absent(&mut self, job: &GenerationJob) -> Result<bool, DomainError> {
        if let Some(key) = &job.idempotency_key {
            let taken = self.working.jobs.iter().any(|j| {
                j.project_id == job.project_id
                    && j.job_type == job.job_type
                    && j.idempotency_key.as_ref() == Some(key)
            });
            if taken {
                return Ok(false);
            }
        }
        self.working.jobs.push(job.clone());
        Ok(true)
    }

    async fn find_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
        Ok(self.working.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn lock_job(&mut self, id: Uuid) -> Result<Option<GenerationJob>, DomainError> {
        Ok(self.working.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_job_by_idempotency_key(
        &mut self,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>, DomainError> {
        Ok(self
            .working
            .jobs
            .iter()
            .rev()
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
            .working
            .jobs
            .iter()
            .find(|j| {
                j.project_id == project_id
                    && j.job_type == job_type
                    && j.idempotency_key.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn update_job(&mut self, job: &GenerationJob) -> Result<(), DomainError> {
        if let Some(slot) = self.working.jobs.iter_mut().find(|j| j.id == job.id) {
            *slot = job.clone();
        }
        Ok(())
    }

    async fn list_jobs(
        &mut self,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, DomainError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .working
            .jobs
            .iter()
            .rev()
            .filter(|j| j.project_id == project_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sum_job_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError> {
        Ok(self
            .working
            .jobs
            .iter()
            .filter(|j| j.tenant_id == tenant_id && in_window(j.created_at, from, to))
            .map(GenerationJob::billable_tokens)
            .sum())
    }
}

#[async_trait]
impl UsageRepository for MemoryTx {
    async fn insert_usage_event(&mut self, event: &UsageEvent) -> Result<(), DomainError> {
        self.working.usage_events.push(event.clone());
        Ok(())
    }

    async fn sum_usage_event_tokens(
        &mut self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DomainError> {
        Ok(self
            .working
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && in_window(e.created_at, from, to))
            .map(|e| e.total_tokens)
            .sum())
    }
}

#[async_trait]
impl CreationRepository for MemoryTx {
    async fn insert_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError> {
        self.working
            .creation_sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn lock_creation_session(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ProjectCreationSession>, DomainError> {
        Ok(self.working.creation_sessions.get(&id).cloned())
    }

    async fn update_creation_session(
        &mut self,
        session: &ProjectCreationSession,
    ) -> Result<(), DomainError> {
        self.working
            .creation_sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn insert_creation_turn(&mut self, turn: &ConversationTurn) -> Result<(), DomainError> {
        self.working.creation_turns.push(turn.clone());
        Ok(())
    }

    async fn list_creation_turns(
        &mut self,
        session_id: Uuid,
    ) -> Result<Vec<ConversationTurn>, DomainError> {
        Ok(self
            .working
            .creation_turns
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}
