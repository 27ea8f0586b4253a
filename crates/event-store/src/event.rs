use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::SagaId;

/// Sequence number of an event within one saga's log.
///
/// Ids start at 1 for a saga's first event and increase by one for each
/// subsequent event of that saga. Only an event store mints them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Creates an event id from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The id preceding a saga's first event (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// The id of a saga's first event (1).
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An event that can be recorded in a saga log.
///
/// Implementors are immutable facts. `is_terminal` marks the events that
/// close a saga's log; nothing may be appended for that saga afterwards.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Returns the event type name, used for storage and filtering.
    fn event_type(&self) -> &'static str;

    /// Returns true if this event ends the saga's log.
    fn is_terminal(&self) -> bool;
}

/// An event together with the id the event store assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// Sequence id within the saga's log.
    pub id: EventId,

    /// The saga this event belongs to.
    pub saga_id: SagaId,

    /// When the event was first recorded.
    pub timestamp: DateTime<Utc>,

    /// The event itself.
    pub event: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wraps an event, stamping it with the current time.
    pub fn new(id: EventId, saga_id: SagaId, event: E) -> Self {
        Self {
            id,
            saga_id,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Minimal event used to exercise the stores.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum TestEvent {
        Opened,
        Noted(String),
        Closed,
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Opened => "Opened",
                TestEvent::Noted(_) => "Noted",
                TestEvent::Closed => "Closed",
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, TestEvent::Closed)
        }
    }
}
