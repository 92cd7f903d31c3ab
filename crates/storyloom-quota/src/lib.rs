//! Storyloom — token admission control.
//!
//! Gates expensive generation behind two independent checks: a coarse balance
//! pre-flight and a per-UTC-day usage ceiling. Also records usage after the
//! fact, on a best-effort basis.

pub mod application;
pub mod domain;
