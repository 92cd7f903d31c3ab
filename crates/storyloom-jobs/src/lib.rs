//! Storyloom — job ledger.
//!
//! A job row is written before every generation call and settled after it,
//! so a client can poll a request's fate even if the process dies mid-call.
//! Idempotency keys make retried submissions return the original job.

pub mod application;
pub mod domain;
