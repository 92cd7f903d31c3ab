//! Application layer for artifact versioning.

pub mod queries;
pub mod version_store;
