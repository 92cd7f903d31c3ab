//! Domain layer for orchestration.

pub mod commands;
pub mod confirmation;
pub mod outcome;
