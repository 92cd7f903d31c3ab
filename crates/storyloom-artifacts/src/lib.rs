//! Storyloom — artifact version store.
//!
//! Every artifact owns an append-only ledger of immutable versions spread
//! over named branches, plus a single active pointer. Version numbers form
//! one gapless sequence per artifact across all branches, and moving the
//! active pointer is the only way "current" content changes.

pub mod application;
pub mod domain;
