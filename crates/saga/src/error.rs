//! Saga error types.

use common::SagaId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::request::Method;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga definition is malformed. Nothing was recorded.
    #[error("Invalid saga definition: {0}")]
    Interpretation(String),

    /// A remote call failed.
    #[error("{method} {path} on service '{service}' failed: {reason}")]
    TransportFailure {
        service: String,
        method: Method,
        path: String,
        reason: String,
    },

    /// The event log could not be written or read. The saga must not make
    /// further remote calls.
    #[error("Persistence error: {0}")]
    Persistence(#[from] EventStoreError),

    /// A recovered log violates the event log invariants.
    #[error("Corrupt event log for saga {saga_id}: {reason}")]
    CorruptLog { saga_id: SagaId, reason: String },

    /// Another execution of this saga is in flight.
    #[error("Saga {0} is already running")]
    AlreadyRunning(SagaId),

    /// A saga with this id has already been recorded.
    #[error("Saga {0} already exists")]
    DuplicateSaga(SagaId),

    /// The saga was rolled back.
    #[error(
        "Saga {saga_id} aborted (failed request: {}); compensation failed for {compensation_failures:?}",
        failed_request.as_deref().unwrap_or("unknown")
    )]
    Aborted {
        saga_id: SagaId,
        failed_request: Option<String>,
        compensation_failures: Vec<String>,
    },

    /// A collaborator could not be configured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SagaError {
    /// Builds a transport failure for one remote call.
    pub fn transport_failure(
        service: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SagaError::TransportFailure {
            service: service.into(),
            method,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_log(saga_id: SagaId, reason: impl Into<String>) -> Self {
        SagaError::CorruptLog {
            saga_id,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
