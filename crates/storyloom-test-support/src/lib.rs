//! Shared test doubles and utilities for the Storyloom generation backend.

mod capability;
mod clock;
mod fixtures;
mod store;

pub use capability::{
    DisabledIndexer, FailingCache, FailingConflictScanner, MemoryCache, RecordingIndexer,
    ScriptedGenerator, StaticConflictScanner,
};
pub use clock::{FixedClock, fixed_now};
pub use fixtures::{conversation_session, creation_session, job, project, tenant};
pub use store::{FailingStore, InMemoryStore, MemoryState};
