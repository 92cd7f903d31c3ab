//! Domain layer for artifact versioning.

pub mod activation;
pub mod diff;
pub mod foundation;
