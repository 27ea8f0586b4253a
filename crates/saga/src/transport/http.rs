//! HTTP transport backed by reqwest.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::Transport;
use crate::error::{Result, SagaError};
use crate::request::{Method, Parameters};

/// Sends saga operations as HTTP requests.
///
/// Service names resolve to base URLs through a fixed table. A `query`
/// parameter is encoded into the query string, a `json` parameter becomes a
/// JSON body and a `form` parameter a urlencoded body. Any non-2xx response
/// is a failure.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    services: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(services: HashMap<String, String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Configuration(format!("HTTP client: {e}")))?;

        let services = services
            .into_iter()
            .map(|(name, url)| (name, url.trim_end_matches('/').to_string()))
            .collect();

        Ok(Self { client, services })
    }

    /// Returns the base URL a service name resolves to.
    pub fn base_url(&self, service_name: &str) -> Option<&str> {
        self.services.get(service_name).map(String::as_str)
    }

    fn http_method(method: Method) -> Option<reqwest::Method> {
        match method {
            Method::Nop => None,
            Method::Get => Some(reqwest::Method::GET),
            Method::Post => Some(reqwest::Method::POST),
            Method::Put => Some(reqwest::Method::PUT),
            Method::Patch => Some(reqwest::Method::PATCH),
            Method::Delete => Some(reqwest::Method::DELETE),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, params))]
    async fn with(
        &self,
        service_name: &str,
        path: &str,
        method: Method,
        params: &Parameters,
    ) -> Result<()> {
        let Some(http_method) = Self::http_method(method) else {
            return Ok(());
        };
        let failure =
            |reason: String| SagaError::transport_failure(service_name, method, path, reason);

        let base_url = self
            .base_url(service_name)
            .ok_or_else(|| failure("unknown service".to_string()))?;

        let mut request = self
            .client
            .request(http_method, format!("{base_url}{path}"));
        if let Some(query) = params.get("query") {
            request = request.query(query);
        }
        if let Some(json) = params.get("json") {
            request = request.json(json);
        } else if let Some(form) = params.get("form") {
            request = request.form(form);
        }

        let response = request.send().await.map_err(|e| failure(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("HTTP {status}")));
        }

        tracing::debug!(%status, "remote call succeeded");
        Ok(())
    }
}
