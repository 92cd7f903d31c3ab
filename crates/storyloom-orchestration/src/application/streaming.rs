//! Streamed sends.
//!
//! Phase 1 runs before [`GenerationOrchestrator::stream_message`] returns.
//! A detached producer then drives the streaming call, forwards fragments
//! through a bounded queue, runs phase 2, and finishes with `Done` or
//! `Error`. Dropping the [`MessageStream`] cancels the producer, which marks
//! the job cancelled and exits; every await in the producer also waits on
//! the cancellation token, so it cannot outlive its consumer for long.

use storyloom_core::capability::CapabilityError;
use storyloom_core::command::Command;
use storyloom_core::error::DomainError;
use storyloom_jobs::application::ledger;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, info, instrument, warn};
use uuid::Uuid;

use crate::application::orchestrator::GenerationOrchestrator;
use crate::application::pipeline::Prepared;
use crate::domain::commands::SendMessage;
use crate::domain::outcome::{GenerationMode, StreamEvent};

/// Consumer side of a streamed send.
#[derive(Debug)]
pub struct MessageStream {
    pub job_id: Uuid,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl MessageStream {
    /// The next event, or `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Asks the producer to stop. Events already queued can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl GenerationOrchestrator {
    /// Like [`send_message`](Self::send_message), but delivers the reply as
    /// it is generated.
    ///
    /// # Errors
    ///
    /// Returns the phase 1 errors of `send_message`. Later failures arrive as
    /// [`StreamEvent::Error`].
    #[instrument(
        skip(self, command),
        fields(
            correlation_id = %command.correlation_id(),
            session_id = %command.session_id,
            project_id = %command.project_id
        )
    )]
    pub async fn stream_message(&self, command: &SendMessage) -> Result<MessageStream, DomainError> {
        info!(command_type = command.command_type(), "handling stream_message command");

        let prepared = self.prepare(command).await?;
        let job_id = prepared.job_id;
        let (events_tx, events_rx) = mpsc::channel(self.config.stream_buffer);
        let cancel = CancellationToken::new();

        let producer = self.clone();
        let token = cancel.clone();
        tokio::spawn(
            async move { producer.produce(prepared, events_tx, token).await }.in_current_span(),
        );

        Ok(MessageStream {
            job_id,
            events: events_rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }

    async fn produce(
        self,
        prepared: Prepared,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let job_id = prepared.job_id;
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(self.config.stream_buffer);
        let mut generation = self
            .generator
            .stream(&prepared.request, chunk_tx, cancel.clone());

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break None,
                Some(chunk) = chunk_rx.recv() => {
                    if !forward(&events, &cancel, StreamEvent::Chunk(chunk)).await {
                        break None;
                    }
                }
                result = &mut generation => break Some(result),
            }
        };
        drop(generation);

        let output = match result {
            None | Some(Err(CapabilityError::Cancelled)) => {
                self.cancel_streamed_job(job_id).await;
                return;
            }
            Some(Err(e)) => {
                let err = DomainError::from(e);
                ledger::record_failure(
                    self.store.as_ref(),
                    self.clock.as_ref(),
                    job_id,
                    &err.to_string(),
                    None,
                )
                .await;
                forward(&events, &cancel, StreamEvent::Error(err.to_string())).await;
                return;
            }
            Some(Ok(output)) => output,
        };

        while let Ok(chunk) = chunk_rx.try_recv() {
            if !forward(&events, &cancel, StreamEvent::Chunk(chunk)).await {
                self.cancel_streamed_job(job_id).await;
                return;
            }
        }
        if !forward(&events, &cancel, StreamEvent::Usage(output.usage)).await {
            self.cancel_streamed_job(job_id).await;
            return;
        }

        let conflicts = self.scan_conflicts(&prepared, &output).await;
        if cancel.is_cancelled() {
            self.cancel_streamed_job(job_id).await;
            return;
        }
        match self
            .finish_message(&prepared, output, conflicts, GenerationMode::Stream)
            .await
        {
            Ok(outcome) => {
                self.after_commit(prepared.tenant_id, prepared.project.id, &outcome)
                    .await;
                forward(&events, &cancel, StreamEvent::Done(Box::new(outcome))).await;
            }
            Err(e) => {
                forward(&events, &cancel, StreamEvent::Error(e.to_string())).await;
            }
        }
    }

    async fn cancel_streamed_job(&self, job_id: Uuid) {
        let result = async {
            let mut tx = self.store.begin().await?;
            ledger::cancel_job(&mut *tx, self.clock.as_ref(), job_id).await?;
            tx.commit().await
        }
        .await;
        match result {
            Ok(()) => info!(%job_id, "stream cancelled by consumer"),
            Err(e) => warn!(%job_id, error = %e, "could not mark streamed job cancelled"),
        }
    }
}

/// Sends `event` unless the consumer cancels or disconnects first. Returns
/// whether it was delivered.
async fn forward(
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use storyloom_core::capability::CapabilityError;
    use storyloom_core::model::{ArtifactType, JobStatus, TurnRole};
    use storyloom_core::scope::RequestScope;
    use storyloom_test_support::{
        FixedClock, InMemoryStore, MemoryCache, RecordingIndexer, ScriptedGenerator,
        StaticConflictScanner, conversation_session, project, tenant,
    };
    use uuid::Uuid;

    use super::*;
    use crate::application::orchestrator::Capabilities;

    async fn setup(generator: ScriptedGenerator) -> (InMemoryStore, GenerationOrchestrator, SendMessage) {
        let store = InMemoryStore::new();
        let tenant = tenant(0);
        let tenant_id = tenant.id;
        let project = project(tenant_id);
        let project_id = project.id;
        let session = conversation_session(&project, ArtifactType::Worldview);
        let session_id = session.id;
        store
            .seed(|s| {
                s.tenants.insert(tenant_id, tenant);
                s.projects.insert(project.id, project);
                s.sessions.insert(session.id, session);
            })
            .await;
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::default()),
            Capabilities {
                generator: Arc::new(generator),
                scanner: Arc::new(StaticConflictScanner::default()),
                indexer: Arc::new(RecordingIndexer::default()),
                cache: Arc::new(MemoryCache::new()),
            },
        );
        let command = SendMessage {
            correlation_id: Uuid::new_v4(),
            tenant_id,
            project_id,
            session_id,
            user_id: None,
            task: None,
            prompt: "a city built on glass tides".to_owned(),
            attachments: Vec::new(),
            branch_key: None,
            activate: None,
            enable_conflict_scan: None,
            scope: RequestScope::default(),
        };
        (store, orchestrator, command)
    }

    async fn collect(stream: &mut MessageStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    async fn wait_for_status(store: &InMemoryStore, job_id: Uuid, status: JobStatus) -> bool {
        for _ in 0..200 {
            let state = store.snapshot().await;
            if state.jobs.iter().any(|j| j.id == job_id && j.status == status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_usage_then_done() {
        // Arrange
        let (store, orchestrator, command) = setup(ScriptedGenerator::new()).await;

        // Act
        let mut stream = orchestrator.stream_message(&command).await.unwrap();
        let events = collect(&mut stream).await;

        // Assert
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(chunk) => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "generated: a city built on glass tides");

        let tail = &events[events.len() - 2..];
        assert!(matches!(tail[0], StreamEvent::Usage(_)));
        match &tail[1] {
            StreamEvent::Done(outcome) => {
                assert_eq!(outcome.job_id, stream.job_id);
                assert_eq!(outcome.version_no, 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }

        let state = store.snapshot().await;
        assert_eq!(state.jobs[0].status, JobStatus::Completed);
        assert_eq!(state.turns[1].role, TurnRole::Assistant);
        assert_eq!(state.turns[1].metadata["mode"], "stream");
    }

    #[tokio::test]
    async fn test_cancel_marks_job_cancelled_and_writes_no_version() {
        // Arrange
        let (store, orchestrator, command) = setup(ScriptedGenerator::new().stalling()).await;
        let mut stream = orchestrator.stream_message(&command).await.unwrap();

        // Act
        let first = stream.next().await;
        stream.cancel();
        let rest = collect(&mut stream).await;

        // Assert
        assert!(matches!(first, Some(StreamEvent::Chunk(_))));
        assert!(rest.iter().all(|e| matches!(e, StreamEvent::Chunk(_))));
        let state = store.snapshot().await;
        assert_eq!(state.jobs[0].status, JobStatus::Cancelled);
        assert!(state.versions.is_empty());
        assert_eq!(state.turns.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_the_stream_stops_the_producer() {
        // Arrange
        let (store, orchestrator, command) = setup(ScriptedGenerator::new().stalling()).await;
        let mut stream = orchestrator.stream_message(&command).await.unwrap();
        let job_id = stream.job_id;
        stream.next().await;

        // Act
        drop(stream);

        // Assert
        assert!(wait_for_status(&store, job_id, JobStatus::Cancelled).await);
    }

    #[tokio::test]
    async fn test_generation_failure_emits_error_and_fails_job() {
        // Arrange
        let generator =
            ScriptedGenerator::new().with_failure(CapabilityError::Failed("bad payload".into()));
        let (store, orchestrator, command) = setup(generator).await;

        // Act
        let mut stream = orchestrator.stream_message(&command).await.unwrap();
        let events = collect(&mut stream).await;

        // Assert
        assert!(matches!(events.as_slice(), [StreamEvent::Error(_)]));
        let state = store.snapshot().await;
        assert_eq!(state.jobs[0].status, JobStatus::Failed);
    }
}
