//! Storyloom Core — shared domain model and ports.
//!
//! This crate defines the types, error taxonomy, and traits every bounded
//! context depends on. It contains no infrastructure code.

pub mod capability;
pub mod clock;
pub mod command;
pub mod error;
pub mod model;
pub mod repository;
pub mod scope;
