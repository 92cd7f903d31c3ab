//! Storyloom — generation orchestration.
//!
//! Turns a user message into a new artifact version. Each request brackets
//! one slow external generation call with two short transactions: the first
//! admits the request and records the user turn and job, the second writes
//! the version, the assistant turn, and settles the job. No transaction or
//! lock is held while the model runs.
//!
//! Also hosts the project creation dialogue, whose model-proposed side effect
//! is gated by a deterministic confirmation check.

pub mod application;
pub mod config;
pub mod domain;
