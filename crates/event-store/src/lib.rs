//! Append-only saga event log.
//!
//! The [`EventStore`] is the process-local, strictly ordered log that mints
//! per-saga sequence ids. A [`PersistentStore`] is the durable copy consulted
//! at startup to find sagas that never reached a terminal event.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::SagaId;
pub use error::{EventStoreError, Result};
pub use event::{Event, EventEnvelope, EventId};
pub use memory::{InMemoryEventStore, InMemoryPersistentStore};
pub use postgres::PostgresPersistentStore;
pub use store::{EventStore, EventStoreExt, EventStream, PendingSagas, PersistentStore};
