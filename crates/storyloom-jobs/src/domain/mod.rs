//! Domain layer for the job ledger.

pub mod lifecycle;
