use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Event, EventEnvelope, EventId, Result, SagaId};

/// A stream of events.
pub type EventStream<E> = Pin<Box<dyn Stream<Item = Result<EventEnvelope<E>>> + Send>>;

/// Recovered logs of sagas that never reached a terminal event, keyed by saga.
pub type PendingSagas<E> = HashMap<SagaId, Vec<EventEnvelope<E>>>;

/// Process-local, append-only log of saga events.
///
/// The store is the only component that assigns event ids. Entries are never
/// removed or reordered. Implementations must be safe to share between
/// concurrently running sagas.
#[async_trait]
pub trait EventStore<E: Event>: Send + Sync {
    /// Appends an event to a saga's log and returns it with its assigned id.
    ///
    /// Fails with `SagaTerminated` if the saga's log already ends with a
    /// terminal event.
    async fn append(&self, saga_id: SagaId, event: E) -> Result<EventEnvelope<E>>;

    /// Returns the id the saga's next event will receive, without reserving it.
    ///
    /// Fails with `SagaTerminated` if the saga's log already ends with a
    /// terminal event.
    async fn next_event_id(&self, saga_id: SagaId) -> Result<EventId>;

    /// Appends an envelope that already carries its id: one recovered from
    /// the persistent store, or one persisted before reaching this store.
    ///
    /// The store mints the next id for the saga as usual and fails with
    /// `SequenceMismatch` if it differs from the envelope's id. The original
    /// timestamp is kept.
    async fn replay(&self, envelope: EventEnvelope<E>) -> Result<EventEnvelope<E>>;

    /// Returns every envelope in insertion order.
    async fn events(&self) -> Result<Vec<EventEnvelope<E>>>;

    /// Returns one saga's envelopes in id order.
    async fn events_for_saga(&self, saga_id: SagaId) -> Result<Vec<EventEnvelope<E>>>;

    /// Streams every envelope in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream<E>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt<E: Event>: EventStore<E> {
    /// Returns the id of the saga's latest event, if it has any.
    async fn last_event_id(&self, saga_id: SagaId) -> Result<Option<EventId>> {
        Ok(self
            .events_for_saga(saga_id)
            .await?
            .last()
            .map(|envelope| envelope.id))
    }

    /// Returns true if the saga's log ends with a terminal event.
    async fn is_terminated(&self, saga_id: SagaId) -> Result<bool> {
        Ok(self
            .events_for_saga(saga_id)
            .await?
            .last()
            .is_some_and(|envelope| envelope.is_terminal()))
    }
}

// Blanket implementation for all EventStore implementations
impl<E: Event, T: EventStore<E> + ?Sized> EventStoreExt<E> for T {}

/// Durable record of saga events.
///
/// `append` must complete before the side effect the event describes is
/// attempted, so that recovery can tell "started, outcome unknown" from
/// "never attempted".
#[async_trait]
pub trait PersistentStore<E: Event>: Send + Sync {
    /// Durably records one envelope.
    async fn append(&self, envelope: &EventEnvelope<E>) -> Result<()>;

    /// Returns the full log of every saga lacking a terminal event.
    ///
    /// Each saga's envelopes are sorted by id.
    async fn find_pending_saga_events(&self) -> Result<PendingSagas<E>>;
}
