//! JSON-RPC 2.0 wire types.

use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::HashMap, time::Duration};

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id for a request inside a batch.
pub type RequestId = u64;

/// Results of a batch keyed by request id.
///
/// `None` marks an item whose individual response carried an error. An id
/// that is absent entirely was never answered, e.g. because its slice failed.
pub type BatchResult = HashMap<RequestId, Option<Value>>;

/// A single JSON-RPC request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// The `{jsonrpc, id, method, params}` object sent on the wire.
    pub fn envelope(&self) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": self.id,
            "method": self.method,
            "params": self.params,
        })
    }
}

/// Error member of a response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl From<ErrorObject> for RpcError {
    fn from(err: ErrorObject) -> Self {
        RpcError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// A single response object, either `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl ResponseEnvelope {
    /// Numeric request id. Nodes echo ids back as numbers, some proxies as
    /// strings.
    pub fn request_id(&self) -> Option<RequestId> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Timeout and retry budget for one logical call or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl CallOptions {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    /// Bulk historical batches (120 s, 2 retries).
    pub fn bulk() -> Self {
        Self::new(Duration::from_secs(120), 2)
    }

    /// Single-value lookups (12 s, 2 retries).
    pub fn lookup() -> Self {
        Self::new(Duration::from_secs(12), 2)
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::lookup()
    }
}
