//! Route modules organized by resource.

pub mod artifacts;
pub mod conversation;
pub mod creation;
pub mod health;
pub mod jobs;
pub mod projects;
