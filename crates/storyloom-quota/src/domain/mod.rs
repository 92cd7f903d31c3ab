//! Pure admission rules.

pub mod admission;
