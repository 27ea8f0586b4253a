use thiserror::Error;

use crate::{EventId, SagaId};

/// Errors that can occur when recording or reading saga events.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The saga's log already ends with a terminal event and is immutable.
    #[error("Saga {0} has already terminated; its log is immutable")]
    SagaTerminated(SagaId),

    /// A replayed envelope does not carry the id the store would assign next.
    #[error("Sequence mismatch for saga {saga_id}: expected event id {expected}, found {actual}")]
    SequenceMismatch {
        saga_id: SagaId,
        expected: EventId,
        actual: EventId,
    },

    /// The event was already recorded durably.
    #[error("Event {event_id} of saga {saga_id} is already persisted")]
    DuplicateEvent { saga_id: SagaId, event_id: EventId },

    /// The durable store cannot be reached.
    #[error("Persistent store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
