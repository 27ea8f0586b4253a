//! Saga request model.
//!
//! A saga is an ordered list of requests, each pairing a transaction with the
//! compensation that undoes it. Two sentinel requests bound every saga so the
//! saga's start and end look like ordinary steps in the event stream.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Request id of the start sentinel.
pub const SAGA_START_ID: &str = "saga-start";

/// Request id of the end sentinel.
pub const SAGA_END_ID: &str = "saga-end";

/// Service name shared by both sentinels.
pub const SAGA_SERVICE: &str = "Saga";

static SAGA_START: LazyLock<RequestDescriptor> =
    LazyLock::new(|| RequestDescriptor::sentinel(SAGA_START_ID));

static SAGA_END: LazyLock<RequestDescriptor> =
    LazyLock::new(|| RequestDescriptor::sentinel(SAGA_END_ID));

/// Remote call method. `Nop` performs no call at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Nop,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Nop => "nop",
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nop" => Ok(Method::Nop),
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" => Ok(Method::Delete),
            _ => Err(format!("unknown method '{s}'")),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parameters handed to the transport, keyed by kind (`query`, `form`, `json`).
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// One remote operation: a transaction or a compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Parameters,
}

impl Operation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Parameters::new(),
        }
    }

    /// The operation used by sentinels: no remote call, path `/`.
    pub fn nop() -> Self {
        Self::new(Method::Nop, "/")
    }

    pub fn with_param(mut self, kind: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(kind.into(), value);
        self
    }
}

/// Description of one saga step as it appears in a saga definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub id: String,
    pub service_name: String,
    pub transaction: Operation,
    pub compensation: Operation,
}

impl RequestDescriptor {
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        transaction: Operation,
        compensation: Operation,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            transaction,
            compensation,
        }
    }

    fn sentinel(id: &str) -> Self {
        Self::new(id, SAGA_SERVICE, Operation::nop(), Operation::nop())
    }
}

/// A saga step: an ordinary request or one of the two boundary sentinels.
///
/// All variants expose the same capabilities, so recovery can treat them
/// uniformly. Sentinel data lives in process-wide statics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaRequest {
    SagaStart,
    SagaEnd,
    Step(RequestDescriptor),
}

impl SagaRequest {
    fn descriptor(&self) -> &RequestDescriptor {
        match self {
            SagaRequest::SagaStart => &*SAGA_START,
            SagaRequest::SagaEnd => &*SAGA_END,
            SagaRequest::Step(descriptor) => descriptor,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor().id
    }

    pub fn service_name(&self) -> &str {
        &self.descriptor().service_name
    }

    pub fn transaction(&self) -> &Operation {
        &self.descriptor().transaction
    }

    pub fn compensation(&self) -> &Operation {
        &self.descriptor().compensation
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, SagaRequest::Step(_))
    }
}

impl From<RequestDescriptor> for SagaRequest {
    fn from(descriptor: RequestDescriptor) -> Self {
        SagaRequest::Step(descriptor)
    }
}

impl std::fmt::Display for SagaRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id(), self.service_name())
    }
}
