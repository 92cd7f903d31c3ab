//! Artifact and version writes.
//!
//! These functions run inside the caller's transaction; none of them commit.
//! Version numbering relies on the artifact row lock taken by
//! [`create_version`], so two writers on one artifact cannot both observe the
//! same maximum.

use storyloom_core::clock::Clock;
use storyloom_core::error::{ConflictError, DomainError, NotFoundError};
use storyloom_core::model::{
    ArtifactType, ArtifactVersion, BranchHead, MAIN_BRANCH, NewArtifactVersion, ProjectArtifact,
};
use storyloom_core::repository::ArtifactRepository;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a new version on a branch derives from.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchBase {
    /// The version the new one will name as parent, if any.
    pub version_id: Option<Uuid>,
    /// Content of that version.
    pub content: Option<serde_json::Value>,
}

impl BranchBase {
    /// The base of an artifact that has never been generated.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version_id: None,
            content: None,
        }
    }
}

/// Returns the artifact of `artifact_type` in `project_id`, creating it on
/// first use. Safe under concurrent callers: a lost insert race re-reads the
/// winner's row.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the store fails.
pub async fn ensure_artifact<R>(
    repo: &mut R,
    clock: &dyn Clock,
    tenant_id: Uuid,
    project_id: Uuid,
    artifact_type: ArtifactType,
) -> Result<ProjectArtifact, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    if let Some(existing) = repo.find_artifact_by_type(project_id, artifact_type).await? {
        return Ok(existing);
    }

    let now = clock.now();
    let artifact = ProjectArtifact {
        id: Uuid::new_v4(),
        tenant_id,
        project_id,
        artifact_type,
        active_version_id: None,
        created_at: now,
        updated_at: now,
    };
    if repo.insert_artifact_if_absent(&artifact).await? {
        info!(artifact_id = %artifact.id, %project_id, %artifact_type, "artifact created");
        return Ok(artifact);
    }

    repo.find_artifact_by_type(project_id, artifact_type)
        .await?
        .ok_or_else(|| {
            DomainError::Infrastructure(format!(
                "artifact {artifact_type} of project {project_id} vanished after insert conflict"
            ))
        })
}

/// Highest version number of the artifact across every branch, 0 if none.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the store fails.
pub async fn latest_version_no<R>(repo: &mut R, artifact_id: Uuid) -> Result<i32, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    repo.max_version_no(artifact_id).await
}

/// Resolves the version a new version on `branch_key` should derive from.
///
/// A side branch uses its own newest version, falling back to the artifact's
/// active version when the branch is new. `main` always uses the active
/// version. An artifact without an active version yields an empty base.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` for an unknown artifact and
/// `NotFoundError::Version` if the active pointer dangles.
pub async fn resolve_branch_base<R>(
    repo: &mut R,
    artifact_id: Uuid,
    branch_key: &str,
) -> Result<BranchBase, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let artifact = repo
        .find_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;

    let head = if branch_key == MAIN_BRANCH {
        None
    } else {
        repo.latest_version_on_branch(artifact_id, branch_key).await?
    };
    if let Some(head) = head {
        return Ok(BranchBase {
            version_id: Some(head.id),
            content: Some(head.content),
        });
    }

    let Some(active_id) = artifact.active_version_id else {
        return Ok(BranchBase::empty());
    };
    let active = repo
        .find_version(active_id)
        .await?
        .ok_or(NotFoundError::Version(active_id))?;
    debug!(
        %artifact_id,
        branch_key,
        base_version_no = active.version_no,
        "branch base resolved from active version"
    );

    Ok(BranchBase {
        version_id: Some(active.id),
        content: Some(active.content),
    })
}

/// Locks the artifact row and reports whether `branch_key` has no versions
/// yet. The answer holds until the caller's transaction ends, so concurrent
/// writers to a new branch cannot both see it empty.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` for an unknown artifact.
pub async fn lock_branch<R>(
    repo: &mut R,
    artifact_id: Uuid,
    branch_key: &str,
) -> Result<bool, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    repo.lock_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;
    Ok(repo
        .latest_version_on_branch(artifact_id, branch_key)
        .await?
        .is_none())
}

/// Appends a version with the next free number. Numbers are never reused,
/// including after the active pointer is rolled back.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` for an unknown artifact and
/// `ConflictError::StaleBranchBase` if `parent_version_id` does not belong to
/// the artifact.
pub async fn create_version<R>(
    repo: &mut R,
    clock: &dyn Clock,
    artifact_id: Uuid,
    new: NewArtifactVersion,
) -> Result<ArtifactVersion, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    repo.lock_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;

    if let Some(parent_id) = new.parent_version_id {
        let parent_matches = repo
            .find_version(parent_id)
            .await?
            .is_some_and(|parent| parent.artifact_id == artifact_id);
        if !parent_matches {
            return Err(ConflictError::StaleBranchBase {
                artifact_id,
                version_id: parent_id,
            }
            .into());
        }
    }

    let version_no = repo.max_version_no(artifact_id).await? + 1;
    let version = ArtifactVersion {
        id: Uuid::new_v4(),
        artifact_id,
        version_no,
        branch_key: new.branch_key,
        parent_version_id: new.parent_version_id,
        content: new.content,
        created_by: new.created_by,
        source_job_id: new.source_job_id,
        created_at: clock.now(),
    };
    repo.insert_version(&version).await?;

    info!(
        %artifact_id,
        version_id = %version.id,
        version_no,
        branch_key = %version.branch_key,
        "artifact version created"
    );
    Ok(version)
}

/// Points the artifact at one of its own versions. Rolling back is this
/// call with an older version; no content is copied or mutated.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` or `NotFoundError::Version` for unknown
/// ids and `ConflictError::VersionNotInArtifact` when the version belongs to
/// another artifact.
pub async fn set_active_version<R>(
    repo: &mut R,
    clock: &dyn Clock,
    artifact_id: Uuid,
    version_id: Uuid,
) -> Result<ProjectArtifact, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let mut artifact = repo
        .lock_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;
    let version = repo
        .find_version(version_id)
        .await?
        .ok_or(NotFoundError::Version(version_id))?;
    if version.artifact_id != artifact_id {
        return Err(ConflictError::VersionNotInArtifact {
            artifact_id,
            version_id,
        }
        .into());
    }

    let now = clock.now();
    repo.set_active_version(artifact_id, version_id, now).await?;
    artifact.active_version_id = Some(version_id);
    artifact.updated_at = now;

    info!(%artifact_id, %version_id, version_no = version.version_no, "active version set");
    Ok(artifact)
}

/// The newest version of every branch, flagged when it is the active one.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` for an unknown artifact.
pub async fn list_branch_heads<R>(
    repo: &mut R,
    artifact_id: Uuid,
) -> Result<Vec<BranchHead>, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let artifact = repo
        .find_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;
    let heads = repo.branch_heads(artifact_id).await?;
    Ok(heads
        .into_iter()
        .map(|v| BranchHead {
            is_active: artifact.active_version_id == Some(v.id),
            branch_key: v.branch_key,
            version_id: v.id,
            version_no: v.version_no,
            created_at: v.created_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storyloom_core::error::{ConflictError, DomainError, NotFoundError};
    use storyloom_core::model::{ArtifactType, MAIN_BRANCH, NewArtifactVersion};
    use storyloom_core::repository::{ArtifactRepository, Store, StoreTx};
    use storyloom_test_support::{FixedClock, InMemoryStore};
    use uuid::Uuid;

    use super::*;

    fn new_version(branch: &str, parent: Option<Uuid>, content: serde_json::Value) -> NewArtifactVersion {
        NewArtifactVersion {
            branch_key: branch.to_owned(),
            parent_version_id: parent,
            content,
            created_by: None,
            source_job_id: None,
        }
    }

    async fn artifact_in(tx: &mut dyn StoreTx, clock: &FixedClock) -> ProjectArtifact {
        ensure_artifact(tx, clock, Uuid::new_v4(), Uuid::new_v4(), ArtifactType::Worldview)
            .await
            .unwrap()
    }

    async fn activate_new(
        tx: &mut dyn StoreTx,
        clock: &FixedClock,
        artifact_id: Uuid,
        branch: &str,
        parent: Option<Uuid>,
        content: serde_json::Value,
    ) -> ArtifactVersion {
        let version = create_version(tx, clock, artifact_id, new_version(branch, parent, content))
            .await
            .unwrap();
        set_active_version(tx, clock, artifact_id, version.id)
            .await
            .unwrap();
        version
    }

    #[tokio::test]
    async fn test_ensure_artifact_is_idempotent() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let project_id = Uuid::new_v4();

        // Act
        let first = ensure_artifact(&mut *tx, &clock, Uuid::new_v4(), project_id, ArtifactType::Outline)
            .await
            .unwrap();
        let second = ensure_artifact(&mut *tx, &clock, Uuid::new_v4(), project_id, ArtifactType::Outline)
            .await
            .unwrap();

        // Assert
        assert_eq!(first.id, second.id);
        assert_eq!(tx.list_artifacts(project_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_numbers_increase_across_branches() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;

        // Act
        let v1 = create_version(&mut *tx, &clock, artifact.id, new_version(MAIN_BRANCH, None, json!({})))
            .await
            .unwrap();
        let v2 = create_version(&mut *tx, &clock, artifact.id, new_version("draft", Some(v1.id), json!({})))
            .await
            .unwrap();
        let v3 = create_version(&mut *tx, &clock, artifact.id, new_version(MAIN_BRANCH, Some(v1.id), json!({})))
            .await
            .unwrap();

        // Assert
        assert_eq!([v1.version_no, v2.version_no, v3.version_no], [1, 2, 3]);
        assert_eq!(latest_version_no(&mut *tx, artifact.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_latest_version_no_is_zero_without_versions() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(latest_version_no(&mut *tx, Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_numbers_are_not_reused_after_rollback() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let v1 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, None, json!({"n": 1})).await;
        activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, Some(v1.id), json!({"n": 2})).await;
        set_active_version(&mut *tx, &clock, artifact.id, v1.id)
            .await
            .unwrap();

        // Act
        let v3 = create_version(&mut *tx, &clock, artifact.id, new_version(MAIN_BRANCH, Some(v1.id), json!({"n": 3})))
            .await
            .unwrap();

        // Assert
        assert_eq!(v3.version_no, 3);
    }

    #[tokio::test]
    async fn test_rollback_moves_pointer_without_new_rows() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let v1 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, None, json!({"n": 1})).await;
        let v2 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, Some(v1.id), json!({"n": 2})).await;

        // Act
        let rolled_back = set_active_version(&mut *tx, &clock, artifact.id, v1.id)
            .await
            .unwrap();

        // Assert
        assert_eq!(rolled_back.active_version_id, Some(v1.id));
        assert_eq!(tx.list_versions(artifact.id, None).await.unwrap().len(), 2);
        let heads = list_branch_heads(&mut *tx, artifact.id).await.unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].branch_key, MAIN_BRANCH);
        assert_eq!(heads[0].version_id, v2.id);
        assert_eq!(heads[0].version_no, 2);
        assert!(!heads[0].is_active);
    }

    #[tokio::test]
    async fn test_new_branch_falls_back_to_active_content() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let v1 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, None, json!({"era": "iron"})).await;

        // Act
        let base = resolve_branch_base(&mut *tx, artifact.id, "what-if").await.unwrap();

        // Assert
        assert_eq!(base.version_id, Some(v1.id));
        assert_eq!(base.content, Some(json!({"era": "iron"})));
    }

    #[tokio::test]
    async fn test_existing_branch_resolves_to_its_own_head() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let v1 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, None, json!({"era": "iron"})).await;
        let draft = create_version(&mut *tx, &clock, artifact.id, new_version("what-if", Some(v1.id), json!({"era": "glass"})))
            .await
            .unwrap();

        // Act
        let branch = resolve_branch_base(&mut *tx, artifact.id, "what-if").await.unwrap();
        let main = resolve_branch_base(&mut *tx, artifact.id, MAIN_BRANCH).await.unwrap();

        // Assert
        assert_eq!(branch.version_id, Some(draft.id));
        assert_eq!(main.version_id, Some(v1.id));
    }

    #[tokio::test]
    async fn test_lock_branch_reports_whether_branch_is_new() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let v1 = activate_new(&mut *tx, &clock, artifact.id, MAIN_BRANCH, None, json!({})).await;
        create_version(&mut *tx, &clock, artifact.id, new_version("what-if", Some(v1.id), json!({})))
            .await
            .unwrap();

        // Act
        let existing = lock_branch(&mut *tx, artifact.id, "what-if").await.unwrap();
        let fresh = lock_branch(&mut *tx, artifact.id, "noir-cut").await.unwrap();
        let missing = lock_branch(&mut *tx, Uuid::new_v4(), "what-if").await;

        // Assert
        assert!(!existing);
        assert!(fresh);
        assert!(matches!(missing, Err(DomainError::NotFound(NotFoundError::Artifact(_)))));
    }

    #[tokio::test]
    async fn test_ungenerated_artifact_has_empty_base() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;

        // Act
        let base = resolve_branch_base(&mut *tx, artifact.id, MAIN_BRANCH).await.unwrap();

        // Assert
        assert_eq!(base, BranchBase::empty());
    }

    #[tokio::test]
    async fn test_foreign_version_cannot_be_activated() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let a = artifact_in(&mut *tx, &clock).await;
        let b = artifact_in(&mut *tx, &clock).await;
        let foreign = create_version(&mut *tx, &clock, b.id, new_version(MAIN_BRANCH, None, json!({})))
            .await
            .unwrap();

        // Act
        let result = set_active_version(&mut *tx, &clock, a.id, foreign.id).await;

        // Assert
        match result {
            Err(DomainError::Conflict(ConflictError::VersionNotInArtifact {
                artifact_id,
                version_id,
            })) => {
                assert_eq!(artifact_id, a.id);
                assert_eq!(version_id, foreign.id);
            }
            other => panic!("expected VersionNotInArtifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_parent_is_a_stale_base() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let a = artifact_in(&mut *tx, &clock).await;
        let b = artifact_in(&mut *tx, &clock).await;
        let foreign = create_version(&mut *tx, &clock, b.id, new_version(MAIN_BRANCH, None, json!({})))
            .await
            .unwrap();

        // Act
        let result = create_version(&mut *tx, &clock, a.id, new_version(MAIN_BRANCH, Some(foreign.id), json!({}))).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::Conflict(ConflictError::StaleBranchBase { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let mut tx = store.begin().await.unwrap();
        let artifact = artifact_in(&mut *tx, &clock).await;
        let missing = Uuid::new_v4();

        // Act
        let no_artifact = set_active_version(&mut *tx, &clock, missing, missing).await;
        let no_version = set_active_version(&mut *tx, &clock, artifact.id, missing).await;

        // Assert
        assert!(matches!(
            no_artifact,
            Err(DomainError::NotFound(NotFoundError::Artifact(_)))
        ));
        assert!(matches!(
            no_version,
            Err(DomainError::NotFound(NotFoundError::Version(_)))
        ));
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_with_transaction() {
        // Arrange
        let store = InMemoryStore::new();
        let clock = FixedClock::default();
        let artifact_id = {
            let mut tx = store.begin().await.unwrap();
            let artifact = artifact_in(&mut *tx, &clock).await;
            tx.commit().await.unwrap();
            artifact.id
        };
        store.fail_version_inserts();

        // Act
        let result = {
            let mut tx = store.begin().await.unwrap();
            let created =
                create_version(&mut *tx, &clock, artifact_id, new_version(MAIN_BRANCH, None, json!({})))
                    .await;
            created
        };

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert!(store.snapshot().await.versions.is_empty());
    }
}
