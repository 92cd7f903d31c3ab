//! Capability doubles: scripted generation, canned conflict scans, recording
//! indexers, and in-memory caches.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use storyloom_core::capability::{
    Cache, CapabilityError, ConflictScanner, CreationReply, CreationRequest, GenerationOutput,
    GenerationRequest, Generator, IndexDocument, Indexer, ScanContext, ScanReport,
};
use storyloom_core::model::{CreationAction, TokenUsage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A generator that replays queued outputs and records every request.
///
/// When the queue is empty it echoes the prompt back as
/// `{"text": <prompt>}` with 10 prompt and 20 completion tokens.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    outputs: Mutex<VecDeque<Result<GenerationOutput, CapabilityError>>>,
    creation_replies: Mutex<VecDeque<Result<CreationReply, CapabilityError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    creation_requests: Mutex<Vec<CreationRequest>>,
    stall_after_first_chunk: bool,
}

impl ScriptedGenerator {
    /// Creates a generator with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful output.
    #[must_use]
    pub fn with_output(self, output: GenerationOutput) -> Self {
        self.outputs.lock().unwrap().push_back(Ok(output));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn with_failure(self, error: CapabilityError) -> Self {
        self.outputs.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queues a creation reply.
    #[must_use]
    pub fn with_creation_reply(self, reply: CreationReply) -> Self {
        self.creation_replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    /// Makes `stream` send one fragment and then wait until cancelled.
    #[must_use]
    pub fn stalling(mut self) -> Self {
        self.stall_after_first_chunk = true;
        self
    }

    /// Number of `generate`/`stream` calls so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Snapshot of every generation request received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Snapshot of every creation request received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn creation_requests(&self) -> Vec<CreationRequest> {
        self.creation_requests.lock().unwrap().clone()
    }

    fn next_output(&self, request: &GenerationRequest) -> Result<GenerationOutput, CapabilityError> {
        self.requests.lock().unwrap().push(request.clone());
        self.outputs.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(GenerationOutput {
                raw_text: format!("generated: {}", request.prompt),
                content: json!({ "text": request.prompt }),
                usage: TokenUsage::new(10, 20),
            })
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, CapabilityError> {
        self.next_output(request)
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<GenerationOutput, CapabilityError> {
        let output = self.next_output(request)?;
        for (i, piece) in output.raw_text.split_inclusive(' ').enumerate() {
            if i == 1 && self.stall_after_first_chunk {
                cancel.cancelled().await;
                return Err(CapabilityError::Cancelled);
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(CapabilityError::Cancelled),
                sent = chunks.send(piece.to_owned()) => {
                    if sent.is_err() {
                        return Err(CapabilityError::Cancelled);
                    }
                }
            }
        }
        Ok(output)
    }

    async fn draft_project(
        &self,
        request: &CreationRequest,
    ) -> Result<CreationReply, CapabilityError> {
        self.creation_requests.lock().unwrap().push(request.clone());
        self.creation_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(CreationReply {
                    reply: "Tell me more about your story.".to_owned(),
                    draft: request.draft.clone(),
                    next_stage: None,
                    action: CreationAction::None,
                    usage: TokenUsage::new(5, 5),
                })
            })
    }
}

/// A scanner that returns the same report every time.
#[derive(Debug, Default)]
pub struct StaticConflictScanner {
    report: ScanReport,
    calls: AtomicUsize,
}

impl StaticConflictScanner {
    /// Creates a scanner returning `report`.
    #[must_use]
    pub fn new(report: ScanReport) -> Self {
        Self {
            report,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of scans performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConflictScanner for StaticConflictScanner {
    async fn scan(
        &self,
        _old_content: Option<&serde_json::Value>,
        _new_content: &serde_json::Value,
        _context: &ScanContext,
    ) -> Result<ScanReport, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.report.clone())
    }
}

/// A scanner that always errors.
#[derive(Debug, Default)]
pub struct FailingConflictScanner;

#[async_trait]
impl ConflictScanner for FailingConflictScanner {
    async fn scan(
        &self,
        _old_content: Option<&serde_json::Value>,
        _new_content: &serde_json::Value,
        _context: &ScanContext,
    ) -> Result<ScanReport, CapabilityError> {
        Err(CapabilityError::Unavailable("scanner timed out".into()))
    }
}

/// An indexer that records documents.
#[derive(Debug, Default)]
pub struct RecordingIndexer {
    documents: Mutex<Vec<IndexDocument>>,
}

impl RecordingIndexer {
    /// Snapshot of indexed documents.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn documents(&self) -> Vec<IndexDocument> {
        self.documents.lock().unwrap().clone()
    }

    /// Waits up to one second for at least `count` documents. Indexing runs on
    /// a detached task, so tests poll.
    pub async fn wait_for_documents(&self, count: usize) -> Vec<IndexDocument> {
        for _ in 0..200 {
            let documents = self.documents();
            if documents.len() >= count {
                return documents;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.documents()
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index(&self, document: &IndexDocument) -> Result<(), CapabilityError> {
        self.documents.lock().unwrap().push(document.clone());
        Ok(())
    }
}

/// An indexer that reports itself disabled.
#[derive(Debug, Default)]
pub struct DisabledIndexer;

#[async_trait]
impl Indexer for DisabledIndexer {
    async fn index(&self, _document: &IndexDocument) -> Result<(), CapabilityError> {
        Err(CapabilityError::Disabled)
    }
}

/// A cache backed by a hash map. Records the TTL of each write; never expires.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Duration)>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The TTL the last write to `key` used.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    /// Stored keys.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CapabilityError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), (value.to_vec(), ttl));
        Ok(())
    }
}

/// A cache whose backend is unreachable.
#[derive(Debug, Default)]
pub struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        Err(CapabilityError::Unavailable("connection reset".into()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unavailable("connection reset".into()))
    }
}
