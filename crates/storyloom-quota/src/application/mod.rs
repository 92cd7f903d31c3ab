//! Store-backed admission checks and usage recording.

pub mod checker;
pub mod usage_recorder;
