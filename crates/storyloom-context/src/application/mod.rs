//! Application layer for the rolling context.

pub mod manager;
