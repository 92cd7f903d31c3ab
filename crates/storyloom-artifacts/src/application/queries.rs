//! Read-only artifact queries.

use std::collections::BTreeMap;

use serde::Serialize;
use storyloom_core::error::{ConflictError, DomainError, NotFoundError};
use storyloom_core::model::{ArtifactType, ArtifactVersion, ProjectArtifact};
use storyloom_core::repository::ArtifactRepository;
use uuid::Uuid;

use crate::domain::diff::{self, ArtifactDiff};

/// An artifact with the content of its active version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveArtifact {
    pub artifact: ProjectArtifact,
    pub active_version: Option<ArtifactVersion>,
}

/// Versions of an artifact ordered by number, optionally one branch only.
///
/// # Errors
///
/// Returns `NotFoundError::Artifact` for an unknown artifact.
pub async fn list_versions<R>(
    repo: &mut R,
    artifact_id: Uuid,
    branch_key: Option<&str>,
) -> Result<Vec<ArtifactVersion>, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    repo.find_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;
    repo.list_versions(artifact_id, branch_key).await
}

/// # Errors
///
/// Returns `NotFoundError::Version` for an unknown version.
pub async fn get_version<R>(repo: &mut R, version_id: Uuid) -> Result<ArtifactVersion, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    Ok(repo
        .find_version(version_id)
        .await?
        .ok_or(NotFoundError::Version(version_id))?)
}

/// The artifact of one type in a project with its active version, or `None`
/// if that type was never generated.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the store fails.
pub async fn get_artifact_by_type<R>(
    repo: &mut R,
    project_id: Uuid,
    artifact_type: ArtifactType,
) -> Result<Option<ActiveArtifact>, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let Some(artifact) = repo.find_artifact_by_type(project_id, artifact_type).await? else {
        return Ok(None);
    };
    let active_version = match artifact.active_version_id {
        Some(id) => repo.find_version(id).await?,
        None => None,
    };
    Ok(Some(ActiveArtifact {
        artifact,
        active_version,
    }))
}

/// Active content of every artifact of a project, keyed by type. Artifacts
/// without an active version are omitted.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the store fails.
pub async fn artifact_contents<R>(
    repo: &mut R,
    project_id: Uuid,
) -> Result<BTreeMap<ArtifactType, serde_json::Value>, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let mut contents = BTreeMap::new();
    for artifact in repo.list_artifacts(project_id).await? {
        let Some(active_id) = artifact.active_version_id else {
            continue;
        };
        if let Some(version) = repo.find_version(active_id).await? {
            contents.insert(artifact.artifact_type, version.content);
        }
    }
    Ok(contents)
}

/// Diffs two versions of the same artifact.
///
/// # Errors
///
/// Returns `NotFoundError` for unknown ids and
/// `ConflictError::VersionNotInArtifact` if either version belongs to another
/// artifact.
pub async fn compare_versions<R>(
    repo: &mut R,
    artifact_id: Uuid,
    from_version_id: Uuid,
    to_version_id: Uuid,
) -> Result<ArtifactDiff, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let artifact = repo
        .find_artifact(artifact_id)
        .await?
        .ok_or(NotFoundError::Artifact(artifact_id))?;
    let from = owned_version(repo, artifact_id, from_version_id).await?;
    let to = owned_version(repo, artifact_id, to_version_id).await?;
    Ok(diff::compare(
        artifact.artifact_type,
        &from.content,
        &to.content,
    ))
}

async fn owned_version<R>(
    repo: &mut R,
    artifact_id: Uuid,
    version_id: Uuid,
) -> Result<ArtifactVersion, DomainError>
where
    R: ArtifactRepository + ?Sized,
{
    let version = get_version(repo, version_id).await?;
    if version.artifact_id != artifact_id {
        return Err(ConflictError::VersionNotInArtifact {
            artifact_id,
            version_id,
        }
        .into());
    }
    Ok(version)
}
