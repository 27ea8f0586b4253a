//! Saga instance aggregate.

use std::collections::HashMap;

use common::SagaId;
use event_store::{Event, EventEnvelope, EventId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::request::{SAGA_START_ID, SagaRequest};
use crate::state::{SagaState, TaskState};

/// An event-sourced saga instance.
///
/// Folded from a saga's envelopes. Tracks per-task state plus the order in
/// which transactions completed and were compensated, which is all recovery
/// needs to find its resume point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<SagaId>,
    last_event_id: EventId,
    definition: Option<String>,
    state: SagaState,
    tasks: HashMap<String, TaskState>,
    /// Request ids in completion order, start sentinel first.
    completed: Vec<String>,
    /// Request ids in compensation order.
    compensated: Vec<String>,
}

/// Where execution continues for a recovered saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    /// The log is terminal; nothing to do.
    Done,

    /// Continue forward execution at request index `next`.
    ///
    /// `started` is set when the request's TransactionStarted is already
    /// recorded. `completed` holds the indices of ended requests in
    /// completion order.
    Forward {
        next: usize,
        started: bool,
        completed: Vec<usize>,
    },

    /// Finish an interrupted compensation cascade. `pending` is in the order
    /// compensations must run and always ends with the start sentinel.
    /// `failed` is the request whose transaction started but never ended.
    Compensate {
        pending: Vec<usize>,
        failed: Option<usize>,
    },
}

impl SagaInstance {
    /// Applies one event to the aggregate.
    pub fn apply(&mut self, event: &SagaEvent) {
        match event {
            SagaEvent::SagaStarted {
                request,
                definition,
            } => {
                self.definition = Some(definition.clone());
                self.mark_ended(request);
                self.state = SagaState::Running;
            }
            SagaEvent::TransactionStarted { request } => {
                self.tasks
                    .insert(request.id().to_string(), TaskState::Started);
            }
            SagaEvent::TransactionEnded { request } => {
                self.mark_ended(request);
            }
            SagaEvent::TransactionCompensated { request } => {
                self.mark_compensated(request);
                self.state = SagaState::Compensating;
            }
            SagaEvent::SagaEnded { request } => {
                self.tasks.insert(request.id().to_string(), TaskState::Ended);
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaAborted { request } => {
                self.mark_compensated(request);
                self.state = SagaState::Aborted;
            }
        }
    }

    fn mark_ended(&mut self, request: &SagaRequest) {
        self.tasks.insert(request.id().to_string(), TaskState::Ended);
        self.completed.push(request.id().to_string());
    }

    fn mark_compensated(&mut self, request: &SagaRequest) {
        self.tasks
            .insert(request.id().to_string(), TaskState::Compensated);
        self.compensated.push(request.id().to_string());
    }

    /// Returns why `event` cannot follow the events applied so far.
    fn invalid_transition(&self, event: &SagaEvent) -> Option<String> {
        let required = match event {
            SagaEvent::SagaStarted { .. } if self.state != SagaState::NotStarted => {
                return Some("SagaStarted recorded twice".to_string());
            }
            SagaEvent::TransactionStarted { .. } => TaskState::NotStarted,
            SagaEvent::TransactionEnded { .. } => TaskState::Started,
            SagaEvent::TransactionCompensated { .. } => TaskState::Ended,
            _ => return None,
        };

        let request_id = event.request().id();
        let actual = self.task_state(request_id);
        (actual != required).then(|| {
            format!(
                "{} for request '{request_id}' in task state {actual:?}",
                event.event_type()
            )
        })
    }

    /// Rebuilds a saga from its recorded envelopes.
    ///
    /// The envelopes must belong to `saga_id`, be sorted, carry contiguous
    /// ids starting at 1 and open with SagaStarted. Every task must move
    /// through NotStarted, Started, Ended and Compensated in that order.
    pub fn from_envelopes(saga_id: SagaId, envelopes: &[EventEnvelope<SagaEvent>]) -> Result<Self> {
        let mut saga = SagaInstance {
            id: Some(saga_id),
            ..Default::default()
        };

        for (expected, envelope) in (1..).map(EventId::new).zip(envelopes) {
            if envelope.saga_id != saga_id {
                return Err(SagaError::corrupt_log(
                    saga_id,
                    format!("event {} belongs to saga {}", envelope.id, envelope.saga_id),
                ));
            }
            if envelope.id != expected {
                return Err(SagaError::corrupt_log(
                    saga_id,
                    format!("expected event {expected}, found {}", envelope.id),
                ));
            }
            if expected == EventId::first()
                && !matches!(envelope.event, SagaEvent::SagaStarted { .. })
            {
                return Err(SagaError::corrupt_log(
                    saga_id,
                    format!("log opens with {}", envelope.event_type()),
                ));
            }
            if saga.state.is_terminal() {
                return Err(SagaError::corrupt_log(
                    saga_id,
                    format!("event {} follows a terminal event", envelope.id),
                ));
            }
            if let Some(reason) = saga.invalid_transition(&envelope.event) {
                return Err(SagaError::corrupt_log(
                    saga_id,
                    format!("event {}: {reason}", envelope.id),
                ));
            }
            saga.apply(&envelope.event);
            saga.last_event_id = envelope.id;
        }

        Ok(saga)
    }

    /// Determines where execution continues, given the saga's task sequence.
    ///
    /// `requests` is the interpreted definition, sentinels included.
    pub fn resume_point(&self, requests: &[SagaRequest]) -> Result<Resume> {
        if self.state.is_terminal() {
            return Ok(Resume::Done);
        }

        let saga_id = self.id.unwrap_or_default();
        let index_of = |request_id: &str| {
            requests
                .iter()
                .position(|request| request.id() == request_id)
                .ok_or_else(|| {
                    SagaError::corrupt_log(
                        saga_id,
                        format!("request '{request_id}' is not part of the definition"),
                    )
                })
        };

        let mut completed = Vec::with_capacity(self.completed.len());
        for request_id in &self.completed {
            completed.push(index_of(request_id)?);
        }
        for request_id in self.tasks.keys() {
            index_of(request_id)?;
        }

        if !self.compensated.is_empty() {
            let pending = completed
                .into_iter()
                .rev()
                .filter(|&index| !self.is_compensated(requests[index].id()))
                .collect();
            let failed = requests
                .iter()
                .position(|request| self.task_state(request.id()) == TaskState::Started);
            return Ok(Resume::Compensate { pending, failed });
        }

        let next = requests
            .iter()
            .position(|request| !self.task_state(request.id()).has_ended())
            .unwrap_or(requests.len());
        let started = requests
            .get(next)
            .is_some_and(|request| self.task_state(request.id()) == TaskState::Started);

        Ok(Resume::Forward {
            next,
            started,
            completed,
        })
    }

    fn is_compensated(&self, request_id: &str) -> bool {
        self.task_state(request_id) == TaskState::Compensated
    }
}

// Query methods
impl SagaInstance {
    /// Returns the saga ID.
    pub fn id(&self) -> Option<SagaId> {
        self.id
    }

    /// Returns the id of the last applied event.
    pub fn last_event_id(&self) -> EventId {
        self.last_event_id
    }

    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the definition recorded by SagaStarted, if any.
    pub fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    /// Returns the state of one task; unknown requests have not started.
    pub fn task_state(&self, request_id: &str) -> TaskState {
        self.tasks.get(request_id).copied().unwrap_or_default()
    }

    /// Returns the ids of completed transactions in completion order,
    /// excluding the start sentinel.
    pub fn completed_requests(&self) -> impl Iterator<Item = &str> {
        self.completed
            .iter()
            .map(String::as_str)
            .filter(|id| *id != SAGA_START_ID)
    }

    /// Returns the ids of compensated transactions in compensation order,
    /// excluding the start sentinel.
    pub fn compensated_requests(&self) -> impl Iterator<Item = &str> {
        self.compensated
            .iter()
            .map(String::as_str)
            .filter(|id| *id != SAGA_START_ID)
    }
}
