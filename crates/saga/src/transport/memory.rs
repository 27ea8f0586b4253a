//! In-memory transport for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Transport;
use crate::error::{Result, SagaError};
use crate::request::{Method, Parameters};

/// One call received by the [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportCall {
    pub service_name: String,
    pub path: String,
    pub method: Method,
    pub params: Parameters,
}

impl TransportCall {
    pub fn new(
        service_name: impl Into<String>,
        path: impl Into<String>,
        method: Method,
        params: Parameters,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            path: path.into(),
            method,
            params,
        }
    }
}

type Route = (String, Method, String);

#[derive(Debug, Default)]
struct InMemoryTransportState {
    calls: Vec<TransportCall>,
    /// Remaining failures per route; `None` fails forever.
    failures: HashMap<Route, Option<usize>>,
    latency: Duration,
}

/// Transport that records every call and fails on configured routes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<RwLock<InMemoryTransportState>>,
}

impl InMemoryTransport {
    /// Creates a new in-memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to the route fail.
    pub async fn fail_on(&self, service_name: &str, method: Method, path: &str) {
        self.state
            .write()
            .await
            .failures
            .insert(route(service_name, method, path), None);
    }

    /// Makes the next `times` calls to the route fail.
    pub async fn fail_times(&self, service_name: &str, method: Method, path: &str, times: usize) {
        self.state
            .write()
            .await
            .failures
            .insert(route(service_name, method, path), Some(times));
    }

    /// Delays every call, keeping a saga in flight for a while.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.write().await.latency = latency;
    }

    /// Returns every call received so far, failed ones included.
    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.read().await.calls.clone()
    }

    /// Returns the number of calls received so far.
    pub async fn call_count(&self) -> usize {
        self.state.read().await.calls.len()
    }
}

fn route(service_name: &str, method: Method, path: &str) -> Route {
    (service_name.to_string(), method, path.to_string())
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn with(
        &self,
        service_name: &str,
        path: &str,
        method: Method,
        params: &Parameters,
    ) -> Result<()> {
        let latency = self.state.read().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write().await;
        state.calls.push(TransportCall::new(
            service_name,
            path,
            method,
            params.clone(),
        ));

        let fails = match state.failures.get_mut(&route(service_name, method, path)) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        if fails {
            return Err(SagaError::transport_failure(
                service_name,
                method,
                path,
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls() {
        let transport = InMemoryTransport::new();

        transport
            .with("aaa", "/rest/as", Method::Post, &Parameters::new())
            .await
            .unwrap();

        assert_eq!(
            transport.calls().await,
            vec![TransportCall::new(
                "aaa",
                "/rest/as",
                Method::Post,
                Parameters::new()
            )]
        );
    }

    #[tokio::test]
    async fn test_fail_on_route() {
        let transport = InMemoryTransport::new();
        transport.fail_on("aaa", Method::Post, "/rest/as").await;

        let failed = transport
            .with("aaa", "/rest/as", Method::Post, &Parameters::new())
            .await;
        let other_method = transport
            .with("aaa", "/rest/as", Method::Delete, &Parameters::new())
            .await;

        assert!(matches!(failed, Err(SagaError::TransportFailure { .. })));
        assert!(other_method.is_ok());
        assert_eq!(transport.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_fail_times_recovers() {
        let transport = InMemoryTransport::new();
        transport.fail_times("aaa", Method::Put, "/x", 2).await;

        for _ in 0..2 {
            let result = transport
                .with("aaa", "/x", Method::Put, &Parameters::new())
                .await;
            assert!(result.is_err());
        }
        transport
            .with("aaa", "/x", Method::Put, &Parameters::new())
            .await
            .unwrap();
    }
}
