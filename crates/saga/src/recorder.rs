//! Event recording: the durable copy first, then the process-local log.

use common::SagaId;
use event_store::{EventEnvelope, EventStore, PersistentStore};

use crate::error::Result;
use crate::events::SagaEvent;

/// Writes saga events to the event store and the persistent store.
///
/// `record` returns only once the durable write has completed, so a caller
/// that records TransactionStarted before a remote call never performs the
/// call without a durable trace of it. The event store never holds an event
/// the persistent store lacks.
pub struct EventRecorder<S, P> {
    event_store: S,
    persistent_store: P,
}

impl<S, P> EventRecorder<S, P>
where
    S: EventStore<SagaEvent>,
    P: PersistentStore<SagaEvent>,
{
    pub fn new(event_store: S, persistent_store: P) -> Self {
        Self {
            event_store,
            persistent_store,
        }
    }

    /// Persists an event under the saga's next id, then appends it to the
    /// event store.
    ///
    /// Each saga has a single writer, so the id read here is still free when
    /// the envelope reaches the event store.
    pub async fn record(&self, saga_id: SagaId, event: SagaEvent) -> Result<EventEnvelope<SagaEvent>> {
        let id = self.event_store.next_event_id(saga_id).await?;
        let envelope = EventEnvelope::new(id, saga_id, event);
        self.persistent_store.append(&envelope).await?;
        let envelope = self.event_store.replay(envelope).await?;

        tracing::debug!(
            %saga_id,
            event_id = %envelope.id,
            event_type = envelope.event_type(),
            request = %envelope.event.request(),
            "saga event recorded"
        );
        Ok(envelope)
    }

    /// Re-appends a recovered envelope to the event store only; it is already
    /// durable.
    pub async fn replay(&self, envelope: EventEnvelope<SagaEvent>) -> Result<()> {
        self.event_store.replay(envelope).await?;
        Ok(())
    }

    pub fn event_store(&self) -> &S {
        &self.event_store
    }

    pub fn persistent_store(&self) -> &P {
        &self.persistent_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{EventId, EventStoreError, InMemoryEventStore, InMemoryPersistentStore};

    use crate::error::SagaError;

    fn recorder() -> (
        EventRecorder<InMemoryEventStore<SagaEvent>, InMemoryPersistentStore<SagaEvent>>,
        InMemoryEventStore<SagaEvent>,
        InMemoryPersistentStore<SagaEvent>,
    ) {
        let events = InMemoryEventStore::new();
        let durable = InMemoryPersistentStore::new();
        (
            EventRecorder::new(events.clone(), durable.clone()),
            events,
            durable,
        )
    }

    #[tokio::test]
    async fn record_writes_both_logs() {
        let (recorder, events, durable) = recorder();
        let saga_id = SagaId::new();

        let envelope = recorder
            .record(saga_id, SagaEvent::saga_started("[]"))
            .await
            .unwrap();

        assert_eq!(envelope.id, EventId::first());
        assert_eq!(events.event_count().await, 1);
        assert_eq!(durable.events_for_saga(saga_id).await.len(), 1);
    }

    #[tokio::test]
    async fn record_fails_when_durable_store_is_unavailable() {
        let (recorder, events, durable) = recorder();
        durable.set_unavailable(true);

        let result = recorder
            .record(SagaId::new(), SagaEvent::saga_started("[]"))
            .await;

        assert!(matches!(
            result,
            Err(SagaError::Persistence(EventStoreError::Unavailable(_)))
        ));
        assert_eq!(durable.event_count().await, 0);
        assert_eq!(events.event_count().await, 0);
    }

    #[tokio::test]
    async fn failed_durable_write_leaves_the_id_free() {
        let (recorder, events, durable) = recorder();
        let saga_id = SagaId::new();
        durable.fail_append_after(1);

        recorder
            .record(saga_id, SagaEvent::saga_started("[]"))
            .await
            .unwrap();
        let lost = recorder.record(saga_id, SagaEvent::saga_ended()).await;
        assert!(lost.is_err());
        assert_eq!(events.event_count().await, 1);

        let retried = recorder
            .record(saga_id, SagaEvent::saga_ended())
            .await
            .unwrap();
        assert_eq!(retried.id, EventId::new(2));
        assert_eq!(durable.events_for_saga(saga_id).await.len(), 2);
    }

    #[tokio::test]
    async fn replay_does_not_persist_again() {
        let (recorder, events, durable) = recorder();
        let saga_id = SagaId::new();

        recorder
            .replay(EventEnvelope::new(
                EventId::first(),
                saga_id,
                SagaEvent::saga_started("[]"),
            ))
            .await
            .unwrap();

        assert_eq!(events.event_count().await, 1);
        assert_eq!(durable.event_count().await, 0);
    }
}
