//! Remote call transports.
//!
//! A [`Transport`] performs one transaction or compensation call against a
//! named service. Any non-success outcome is reported as
//! [`SagaError::TransportFailure`](crate::SagaError::TransportFailure).

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{Method, Parameters};

pub use http::HttpTransport;
pub use memory::{InMemoryTransport, TransportCall};

/// Performs remote calls on behalf of saga tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invokes `method` on `path` of the named service.
    async fn with(
        &self,
        service_name: &str,
        path: &str,
        method: Method,
        params: &Parameters,
    ) -> Result<()>;
}
