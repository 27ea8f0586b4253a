//! Saga and task state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// No event has been recorded yet.
    #[default]
    NotStarted,

    /// Transactions are being executed.
    Running,

    /// A transaction failed and completed transactions are being undone.
    Compensating,

    /// Every transaction completed (terminal state).
    Completed,

    /// Compensation finished after a failure (terminal state).
    Aborted,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Aborted)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of one task within a saga.
///
/// ```text
/// NotStarted ──► Started ──► Ended ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskState {
    #[default]
    NotStarted,
    /// The transaction was sent; its outcome is not recorded.
    Started,
    Ended,
    Compensated,
}

impl TaskState {
    /// Returns true if the transaction is known to have succeeded.
    pub fn has_ended(&self) -> bool {
        matches!(self, TaskState::Ended | TaskState::Compensated)
    }
}
