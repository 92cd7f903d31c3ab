//! Application layer for the job ledger.

pub mod ledger;
