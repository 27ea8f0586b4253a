//! Saga coordinator.
//!
//! Orchestrates a sequence of remote transactions across independent
//! services. If any transaction fails, every transaction already completed is
//! undone by its compensation, in reverse order. Every step is event-sourced:
//! after a crash, [`SagaCoordinator::reanimate`] rebuilds unfinished sagas
//! from the durable log and resumes them.
//!
//! A saga definition is a JSON array of requests:
//! 1. Each request names a service, a transaction and a compensation
//! 2. Requests run strictly in order
//! 3. On failure, completed requests are compensated last-completed first

pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod recorder;
pub mod request;
pub mod state;
pub mod task;
pub mod transport;

pub use aggregate::{Resume, SagaInstance};
pub use coordinator::{ReanimateOutcome, SagaCoordinator};
pub use error::SagaError;
pub use events::SagaEvent;
pub use interpreter::{JsonRequestInterpreter, RequestInterpreter};
pub use recorder::EventRecorder;
pub use request::{Method, Operation, Parameters, RequestDescriptor, SagaRequest};
pub use state::{SagaState, TaskState};
pub use task::{RetryPolicy, SagaTask, TaskContext};
pub use transport::{HttpTransport, InMemoryTransport, Transport, TransportCall};
