//! Ports for the external capabilities the core orchestrates but does not own:
//! text generation, conflict scanning, semantic indexing, and the key-value
//! cache behind rolling context.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::{ArtifactType, ConversationTurn, CreationAction, CreationStage, TokenUsage};
use crate::scope::RequestScope;

/// Failure of an external capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The capability is switched off for this deployment. Not a failure.
    #[error("capability disabled")]
    Disabled,

    /// The backend could not be reached.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error or an unusable payload.
    #[error("capability failed: {0}")]
    Failed(String),

    /// The caller cancelled the call.
    #[error("capability call cancelled")]
    Cancelled,
}

impl From<CapabilityError> for DomainError {
    fn from(err: CapabilityError) -> Self {
        DomainError::Infrastructure(err.to_string())
    }
}

/// A file or snippet the user attached to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Everything a generation call sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub project_title: String,
    pub project_description: String,
    pub artifact_type: ArtifactType,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Rolling digest of older turns.
    pub context_summary: String,
    /// Recent user turns, excluding `prompt`.
    pub recent_turns: String,
    /// Active worldview, characters, and outline content, when present.
    pub visible_artifacts: BTreeMap<ArtifactType, serde_json::Value>,
    /// Content of the branch base the new version derives from.
    pub base_content: Option<serde_json::Value>,
    pub scope: RequestScope,
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Raw model text, stored as the assistant turn.
    pub raw_text: String,
    /// Structured artifact content, stored as the new version.
    pub content: serde_json::Value,
    pub usage: TokenUsage,
}

/// Input for one project creation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreationRequest {
    pub stage: CreationStage,
    pub draft: serde_json::Value,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
    pub scope: RequestScope,
}

/// What the model proposes for a creation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationReply {
    pub reply: String,
    pub draft: serde_json::Value,
    pub next_stage: Option<CreationStage>,
    #[serde(default)]
    pub action: CreationAction,
    pub usage: TokenUsage,
}

/// LLM-backed text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produces a complete response.
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationOutput, CapabilityError>;

    /// Streams text fragments into `chunks` and returns the final output.
    ///
    /// Implementations must check `cancel` between fragments and return
    /// [`CapabilityError::Cancelled`] promptly once it fires.
    async fn stream(
        &self,
        request: &GenerationRequest,
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<GenerationOutput, CapabilityError>;

    /// Advances the project creation dialogue.
    async fn draft_project(&self, request: &CreationRequest)
    -> Result<CreationReply, CapabilityError>;
}

/// How serious a detected inconsistency is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One inconsistency between new content and established canon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub severity: Severity,
    pub message: String,
    /// References into existing artifacts, e.g. `characters/Lin Yue`.
    pub refs: Vec<String>,
    pub suggestion: Option<String>,
}

/// Canon the scanner compares against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanContext {
    pub artifact_type: ArtifactType,
    pub project_title: String,
    pub project_description: String,
    pub artifacts: BTreeMap<ArtifactType, serde_json::Value>,
}

/// Scanner output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub warnings: Vec<ConflictWarning>,
    /// Tokens the scan itself consumed, if it called a model.
    pub usage: Option<TokenUsage>,
}

/// Consistency checking between old and new artifact content.
#[async_trait]
pub trait ConflictScanner: Send + Sync {
    async fn scan(
        &self,
        old_content: Option<&serde_json::Value>,
        new_content: &serde_json::Value,
        context: &ScanContext,
    ) -> Result<ScanReport, CapabilityError>;
}

/// A document pushed to the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocument {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub artifact_type: ArtifactType,
    pub artifact_id: Uuid,
    pub content: serde_json::Value,
}

/// Semantic search indexing.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Indexes a document. Returns [`CapabilityError::Disabled`] when indexing
    /// is turned off.
    async fn index(&self, document: &IndexDocument) -> Result<(), CapabilityError>;
}

/// Byte-oriented key-value cache with expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CapabilityError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CapabilityError>;
}
