//! Saga definition interpretation.

use std::collections::HashSet;

use crate::error::{Result, SagaError};
use crate::request::{RequestDescriptor, SAGA_END_ID, SAGA_START_ID, SagaRequest};

/// Turns a saga definition into the ordered requests to execute.
///
/// The result always opens with the start sentinel and closes with the end
/// sentinel.
pub trait RequestInterpreter: Send + Sync {
    fn interpret(&self, definition: &str) -> Result<Vec<SagaRequest>>;
}

/// Interprets a JSON array of request descriptors.
///
/// ```json
/// [{"id": "request-1", "serviceName": "aaa",
///   "transaction": {"method": "post", "path": "/rest/as"},
///   "compensation": {"method": "delete", "path": "/rest/as"}}]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRequestInterpreter;

impl RequestInterpreter for JsonRequestInterpreter {
    fn interpret(&self, definition: &str) -> Result<Vec<SagaRequest>> {
        let descriptors: Vec<RequestDescriptor> = serde_json::from_str(definition)
            .map_err(|e| SagaError::Interpretation(e.to_string()))?;

        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            validate(descriptor)?;
            if !seen.insert(descriptor.id.as_str()) {
                return Err(SagaError::Interpretation(format!(
                    "duplicate request id '{}'",
                    descriptor.id
                )));
            }
        }

        let mut requests = Vec::with_capacity(descriptors.len() + 2);
        requests.push(SagaRequest::SagaStart);
        requests.extend(descriptors.into_iter().map(SagaRequest::from));
        requests.push(SagaRequest::SagaEnd);
        Ok(requests)
    }
}

fn validate(descriptor: &RequestDescriptor) -> Result<()> {
    let invalid = |reason: String| -> Result<()> { Err(SagaError::Interpretation(reason)) };

    if descriptor.id.trim().is_empty() {
        return invalid("request id must not be empty".to_string());
    }
    if descriptor.id == SAGA_START_ID || descriptor.id == SAGA_END_ID {
        return invalid(format!("request id '{}' is reserved", descriptor.id));
    }
    if descriptor.service_name.trim().is_empty() {
        return invalid(format!(
            "request '{}' has an empty service name",
            descriptor.id
        ));
    }
    for operation in [&descriptor.transaction, &descriptor.compensation] {
        if !operation.path.starts_with('/') {
            return invalid(format!(
                "request '{}' has path '{}' not starting with '/'",
                descriptor.id, operation.path
            ));
        }
    }
    Ok(())
}
