//! Identifiers shared by every crate of the saga coordinator.

pub mod types;

pub use types::SagaId;
