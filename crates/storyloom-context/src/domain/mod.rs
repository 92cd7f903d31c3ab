//! Domain layer for the rolling context.

pub mod state;
