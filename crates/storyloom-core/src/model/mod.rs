//! Domain model shared by every bounded context.

mod artifact;
mod conversation;
mod creation;
mod job;
mod tenant;

pub use artifact::{
    ArtifactType, ArtifactVersion, BranchHead, MAIN_BRANCH, NewArtifactVersion, ProjectArtifact,
    normalize_branch_key,
};
pub use conversation::{ConversationSession, ConversationTurn, TurnRole};
pub use creation::{CreationAction, CreationStage, CreationStatus, ProjectCreationSession};
pub use job::{GenerationJob, JobStatus, JobType};
pub use tenant::{Project, Tenant, TokenUsage, UsageEvent};
