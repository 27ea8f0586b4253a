use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Event, EventEnvelope, EventId, EventStoreError, Result, SagaId,
    store::{EventStore, EventStream, PendingSagas, PersistentStore},
};

#[derive(Debug, Default, Clone, Copy)]
struct SagaHead {
    last_id: EventId,
    terminated: bool,
}

struct EventLog<E> {
    events: Vec<EventEnvelope<E>>,
    heads: HashMap<SagaId, SagaHead>,
}

impl<E> Default for EventLog<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            heads: HashMap::new(),
        }
    }
}

impl<E: Event> EventLog<E> {
    /// Reserves the next id for a saga, rejecting appends after a terminal event.
    fn next_id(&mut self, saga_id: SagaId, terminal: bool) -> Result<EventId> {
        let head = self.heads.entry(saga_id).or_default();
        if head.terminated {
            return Err(EventStoreError::SagaTerminated(saga_id));
        }
        let id = head.last_id.next();
        head.last_id = id;
        head.terminated = terminal;
        Ok(id)
    }
}

/// In-memory event store shared by every saga of a process.
///
/// A single lock guards both the ordered log and the per-saga heads, so id
/// assignment and insertion happen atomically.
pub struct InMemoryEventStore<E> {
    log: Arc<RwLock<EventLog<E>>>,
}

impl<E> Clone for InMemoryEventStore<E> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::default())),
        }
    }
}

impl<E: Event> InMemoryEventStore<E> {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl<E: Event> EventStore<E> for InMemoryEventStore<E> {
    async fn append(&self, saga_id: SagaId, event: E) -> Result<EventEnvelope<E>> {
        let mut log = self.log.write().await;
        let id = log.next_id(saga_id, event.is_terminal())?;
        let envelope = EventEnvelope::new(id, saga_id, event);
        log.events.push(envelope.clone());

        tracing::trace!(%saga_id, event_id = %id, event_type = envelope.event_type(), "event appended");
        Ok(envelope)
    }

    async fn next_event_id(&self, saga_id: SagaId) -> Result<EventId> {
        let log = self.log.read().await;
        let head = log.heads.get(&saga_id).copied().unwrap_or_default();
        if head.terminated {
            return Err(EventStoreError::SagaTerminated(saga_id));
        }
        Ok(head.last_id.next())
    }

    async fn replay(&self, envelope: EventEnvelope<E>) -> Result<EventEnvelope<E>> {
        let mut log = self.log.write().await;
        let saga_id = envelope.saga_id;

        let expected = log
            .heads
            .get(&saga_id)
            .map(|head| head.last_id)
            .unwrap_or_default()
            .next();
        if envelope.id != expected {
            return Err(EventStoreError::SequenceMismatch {
                saga_id,
                expected,
                actual: envelope.id,
            });
        }

        log.next_id(saga_id, envelope.is_terminal())?;
        log.events.push(envelope.clone());
        Ok(envelope)
    }

    async fn events(&self) -> Result<Vec<EventEnvelope<E>>> {
        Ok(self.log.read().await.events.clone())
    }

    async fn events_for_saga(&self, saga_id: SagaId) -> Result<Vec<EventEnvelope<E>>> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|envelope| envelope.saga_id == saga_id)
            .cloned()
            .collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream<E>> {
        use futures_util::stream;

        let events = self.log.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// In-memory stand-in for a durable store.
///
/// Used by tests and development setups. `set_unavailable` makes every
/// operation fail, simulating a lost database connection.
pub struct InMemoryPersistentStore<E> {
    logs: Arc<RwLock<HashMap<SagaId, Vec<EventEnvelope<E>>>>>,
    unavailable: Arc<AtomicBool>,
    // Appends left before an injected failure, plus one; zero when disarmed.
    failing_append: Arc<AtomicUsize>,
}

impl<E> Clone for InMemoryPersistentStore<E> {
    fn clone(&self) -> Self {
        Self {
            logs: Arc::clone(&self.logs),
            unavailable: Arc::clone(&self.unavailable),
            failing_append: Arc::clone(&self.failing_append),
        }
    }
}

impl<E> Default for InMemoryPersistentStore<E> {
    fn default() -> Self {
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            failing_append: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<E: Event> InMemoryPersistentStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the store, e.g. with the log of a saga that crashed.
    pub async fn seed(&self, envelopes: impl IntoIterator<Item = EventEnvelope<E>>) {
        let mut logs = self.logs.write().await;
        for envelope in envelopes {
            logs.entry(envelope.saga_id).or_default().push(envelope);
        }
    }

    /// Makes every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets `successes` more appends through, then fails the next one once.
    pub fn fail_append_after(&self, successes: usize) {
        self.failing_append.store(successes + 1, Ordering::SeqCst);
    }

    /// Returns the total number of persisted events.
    pub async fn event_count(&self) -> usize {
        self.logs.read().await.values().map(Vec::len).sum()
    }

    /// Returns one saga's persisted envelopes.
    pub async fn events_for_saga(&self, saga_id: SagaId) -> Vec<EventEnvelope<E>> {
        self.logs
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory persistent store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn take_append_failure(&self) -> Result<()> {
        let countdown = self
            .failing_append
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if countdown == Ok(1) {
            return Err(EventStoreError::Unavailable(
                "in-memory persistent store dropped an append".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Event> PersistentStore<E> for InMemoryPersistentStore<E> {
    async fn append(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        self.check_available()?;
        self.take_append_failure()?;

        let mut logs = self.logs.write().await;
        let log = logs.entry(envelope.saga_id).or_default();
        if log.iter().any(|existing| existing.id == envelope.id) {
            return Err(EventStoreError::DuplicateEvent {
                saga_id: envelope.saga_id,
                event_id: envelope.id,
            });
        }
        log.push(envelope.clone());
        Ok(())
    }

    async fn find_pending_saga_events(&self) -> Result<PendingSagas<E>> {
        self.check_available()?;

        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .filter(|(_, log)| !log.iter().any(EventEnvelope::is_terminal))
            .map(|(saga_id, log)| {
                let mut log = log.clone();
                log.sort_by_key(|envelope| envelope.id);
                (*saga_id, log)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::TestEvent;

    #[tokio::test]
    async fn assigns_ids_per_saga_starting_at_one() {
        let store = InMemoryEventStore::new();
        let first = SagaId::new();
        let second = SagaId::new();

        let a1 = store.append(first, TestEvent::Opened).await.unwrap();
        let b1 = store.append(second, TestEvent::Opened).await.unwrap();
        let a2 = store.append(first, TestEvent::Noted("x".into())).await.unwrap();

        assert_eq!(a1.id, EventId::first());
        assert_eq!(b1.id, EventId::first());
        assert_eq!(a2.id, EventId::new(2));
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn events_keep_insertion_order() {
        let store = InMemoryEventStore::new();
        let first = SagaId::new();
        let second = SagaId::new();

        store.append(first, TestEvent::Opened).await.unwrap();
        store.append(second, TestEvent::Opened).await.unwrap();
        store.append(first, TestEvent::Closed).await.unwrap();

        let sagas: Vec<_> = store
            .events()
            .await
            .unwrap()
            .into_iter()
            .map(|envelope| envelope.saga_id)
            .collect();
        assert_eq!(sagas, vec![first, second, first]);

        let for_first = store.events_for_saga(first).await.unwrap();
        assert_eq!(for_first.len(), 2);
        assert_eq!(for_first[1].event, TestEvent::Closed);
    }

    #[tokio::test]
    async fn rejects_appends_after_terminal_event() {
        let store = InMemoryEventStore::new();
        let saga_id = SagaId::new();

        store.append(saga_id, TestEvent::Opened).await.unwrap();
        store.append(saga_id, TestEvent::Closed).await.unwrap();

        let result = store.append(saga_id, TestEvent::Noted("late".into())).await;
        assert!(matches!(result, Err(EventStoreError::SagaTerminated(id)) if id == saga_id));
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn replay_accepts_the_next_id_only() {
        let store = InMemoryEventStore::new();
        let saga_id = SagaId::new();

        let first = EventEnvelope::new(EventId::first(), saga_id, TestEvent::Opened);
        let replayed = store.replay(first.clone()).await.unwrap();
        assert_eq!(replayed.timestamp, first.timestamp);

        let skipped = EventEnvelope::new(EventId::new(3), saga_id, TestEvent::Noted("x".into()));
        let result = store.replay(skipped).await;
        assert!(matches!(
            result,
            Err(EventStoreError::SequenceMismatch { expected, actual, .. })
                if expected == EventId::new(2) && actual == EventId::new(3)
        ));

        let next = store.append(saga_id, TestEvent::Closed).await.unwrap();
        assert_eq!(next.id, EventId::new(2));
    }

    #[tokio::test]
    async fn next_event_id_does_not_reserve() {
        let store = InMemoryEventStore::new();
        let saga_id = SagaId::new();

        assert_eq!(store.next_event_id(saga_id).await.unwrap(), EventId::first());
        assert_eq!(store.next_event_id(saga_id).await.unwrap(), EventId::first());
        assert_eq!(store.event_count().await, 0);

        let id = store.next_event_id(saga_id).await.unwrap();
        store
            .replay(EventEnvelope::new(id, saga_id, TestEvent::Opened))
            .await
            .unwrap();
        store.append(saga_id, TestEvent::Closed).await.unwrap();

        let result = store.next_event_id(saga_id).await;
        assert!(matches!(result, Err(EventStoreError::SagaTerminated(id)) if id == saga_id));
    }

    #[tokio::test]
    async fn concurrent_appends_get_unique_contiguous_ids() {
        let store = InMemoryEventStore::new();
        let saga_id = SagaId::new();

        let handles: Vec<_> = (0..50)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(saga_id, TestEvent::Noted(n.to_string()))
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().as_i64());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stream_all_events_matches_events() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        store.append(SagaId::new(), TestEvent::Opened).await.unwrap();
        store.append(SagaId::new(), TestEvent::Opened).await.unwrap();

        let stream = store.stream_all_events().await.unwrap();
        let streamed: Vec<_> = stream.collect().await;
        assert_eq!(streamed.len(), 2);
    }

    #[tokio::test]
    async fn pending_sagas_exclude_terminated_logs() {
        let store = InMemoryPersistentStore::new();
        let open = SagaId::new();
        let closed = SagaId::new();

        store
            .seed(vec![
                EventEnvelope::new(EventId::new(2), open, TestEvent::Noted("b".into())),
                EventEnvelope::new(EventId::first(), open, TestEvent::Opened),
                EventEnvelope::new(EventId::first(), closed, TestEvent::Opened),
                EventEnvelope::new(EventId::new(2), closed, TestEvent::Closed),
            ])
            .await;

        let pending = store.find_pending_saga_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        let ids: Vec<_> = pending[&open].iter().map(|e| e.id.as_i64()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn persistent_append_rejects_duplicates() {
        let store = InMemoryPersistentStore::new();
        let envelope = EventEnvelope::new(EventId::first(), SagaId::new(), TestEvent::Opened);

        store.append(&envelope).await.unwrap();
        let result = store.append(&envelope).await;
        assert!(matches!(result, Err(EventStoreError::DuplicateEvent { .. })));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = InMemoryPersistentStore::new();
        store.set_unavailable(true);

        let envelope = EventEnvelope::new(EventId::first(), SagaId::new(), TestEvent::Opened);
        assert!(matches!(
            store.append(&envelope).await,
            Err(EventStoreError::Unavailable(_))
        ));
        assert!(store.find_pending_saga_events().await.is_err());

        store.set_unavailable(false);
        store.append(&envelope).await.unwrap();
        assert_eq!(store.events_for_saga(envelope.saga_id).await.len(), 1);
    }

    #[tokio::test]
    async fn injected_append_failure_fires_once() {
        let store = InMemoryPersistentStore::new();
        let saga_id = SagaId::new();
        store.fail_append_after(1);

        let first = EventEnvelope::new(EventId::first(), saga_id, TestEvent::Opened);
        let second = EventEnvelope::new(EventId::new(2), saga_id, TestEvent::Noted("x".into()));
        store.append(&first).await.unwrap();
        assert!(matches!(
            store.append(&second).await,
            Err(EventStoreError::Unavailable(_))
        ));
        store.append(&second).await.unwrap();

        assert_eq!(store.events_for_saga(saga_id).await.len(), 2);
    }
}
