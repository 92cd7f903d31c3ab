//! Application layer for orchestration.

pub mod creation;
pub mod jobs;
pub mod orchestrator;
mod pipeline;
mod side_effects;
pub mod streaming;
