//! Storyloom — rolling conversation context.
//!
//! Keeps a bounded, lossy digest of each session's prompt history in the
//! cache so generation calls see long-run continuity without the prompt
//! growing with every turn. The append-only turn log in the store remains the
//! system of record.

pub mod application;
pub mod domain;
