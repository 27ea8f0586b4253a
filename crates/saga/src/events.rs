//! Saga domain events.

use event_store::Event;
use serde::{Deserialize, Serialize};

use crate::request::SagaRequest;

/// Events recorded while a saga executes.
///
/// Every event carries the request it concerns; the saga boundary events
/// carry the start or end sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SagaEvent {
    /// Saga execution started. Carries the raw definition so recovery can
    /// rebuild the task sequence.
    SagaStarted {
        request: SagaRequest,
        definition: String,
    },

    /// A transaction is about to be sent to its service.
    TransactionStarted { request: SagaRequest },

    /// A transaction completed successfully.
    TransactionEnded { request: SagaRequest },

    /// A completed transaction was undone by its compensation.
    TransactionCompensated { request: SagaRequest },

    /// Every transaction completed (terminal).
    SagaEnded { request: SagaRequest },

    /// The saga was rolled back after a failure (terminal).
    SagaAborted { request: SagaRequest },
}

impl Event for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted { .. } => "SagaStarted",
            SagaEvent::TransactionStarted { .. } => "TransactionStarted",
            SagaEvent::TransactionEnded { .. } => "TransactionEnded",
            SagaEvent::TransactionCompensated { .. } => "TransactionCompensated",
            SagaEvent::SagaEnded { .. } => "SagaEnded",
            SagaEvent::SagaAborted { .. } => "SagaAborted",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaEvent::SagaEnded { .. } | SagaEvent::SagaAborted { .. }
        )
    }
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(definition: impl Into<String>) -> Self {
        SagaEvent::SagaStarted {
            request: SagaRequest::SagaStart,
            definition: definition.into(),
        }
    }

    pub fn transaction_started(request: SagaRequest) -> Self {
        SagaEvent::TransactionStarted { request }
    }

    pub fn transaction_ended(request: SagaRequest) -> Self {
        SagaEvent::TransactionEnded { request }
    }

    pub fn transaction_compensated(request: SagaRequest) -> Self {
        SagaEvent::TransactionCompensated { request }
    }

    pub fn saga_ended() -> Self {
        SagaEvent::SagaEnded {
            request: SagaRequest::SagaEnd,
        }
    }

    pub fn saga_aborted() -> Self {
        SagaEvent::SagaAborted {
            request: SagaRequest::SagaStart,
        }
    }

    /// Returns the request this event concerns.
    pub fn request(&self) -> &SagaRequest {
        match self {
            SagaEvent::SagaStarted { request, .. }
            | SagaEvent::TransactionStarted { request }
            | SagaEvent::TransactionEnded { request }
            | SagaEvent::TransactionCompensated { request }
            | SagaEvent::SagaEnded { request }
            | SagaEvent::SagaAborted { request } => request,
        }
    }
}
