//! Orchestrator configuration.

use std::time::Duration;

/// Tunables shared by every orchestration entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Balance a tenant must hold before an async job is accepted.
    pub min_token_balance: i64,
    /// Tokens counted against the daily quota while a job is in flight.
    pub token_reservation: i64,
    /// Upper bound for a detached indexing call.
    pub index_timeout: Duration,
    /// Capacity of the event queue between a stream producer and its consumer.
    pub stream_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_token_balance: 1000,
            token_reservation: 2000,
            index_timeout: Duration::from_secs(15),
            stream_buffer: 32,
        }
    }
}
