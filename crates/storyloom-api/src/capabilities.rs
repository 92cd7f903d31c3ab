//! Stand-ins for external capabilities this binary does not bundle.
//!
//! Generation, conflict scanning, and indexing are provided by services
//! outside this process. Until one is wired in, generation reports itself
//! unavailable and the best-effort capabilities report themselves disabled.

use async_trait::async_trait;
use storyloom_core::capability::{
    CapabilityError, ConflictScanner, CreationReply, CreationRequest, GenerationOutput,
    GenerationRequest, Generator, IndexDocument, Indexer, ScanContext, ScanReport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const NO_BACKEND: &str = "no generation backend configured";

/// Capability that is not configured in this deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl Generator for Unconfigured {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationOutput, CapabilityError> {
        Err(CapabilityError::Unavailable(NO_BACKEND.to_owned()))
    }

    async fn stream(
        &self,
        _request: &GenerationRequest,
        _chunks: mpsc::Sender<String>,
        _cancel: CancellationToken,
    ) -> Result<GenerationOutput, CapabilityError> {
        Err(CapabilityError::Unavailable(NO_BACKEND.to_owned()))
    }

    async fn draft_project(
        &self,
        _request: &CreationRequest,
    ) -> Result<CreationReply, CapabilityError> {
        Err(CapabilityError::Unavailable(NO_BACKEND.to_owned()))
    }
}

#[async_trait]
impl ConflictScanner for Unconfigured {
    async fn scan(
        &self,
        _old_content: Option<&serde_json::Value>,
        _new_content: &serde_json::Value,
        _context: &ScanContext,
    ) -> Result<ScanReport, CapabilityError> {
        Err(CapabilityError::Disabled)
    }
}

#[async_trait]
impl Indexer for Unconfigured {
    async fn index(&self, _document: &IndexDocument) -> Result<(), CapabilityError> {
        Err(CapabilityError::Disabled)
    }
}
