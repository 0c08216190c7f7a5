//! JSON-RPC 2.0 message classification and frame construction.
//!
//! Classification works on a pre-parsed `serde_json::Value` so the same
//! logic serves both the downstream NDJSON stream and the upstream SSE
//! message events. Frame builders produce the outbound `Value` objects the
//! transports serialize onto the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A JSON-RPC 2.0 request/response identifier.
///
/// String, integer, or null. Floats, booleans, arrays, and objects are
/// rejected during classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// Integer identifier.
    Number(i64),
    /// String identifier.
    String(String),
    /// Explicit null identifier.
    Null,
}

/// JSON-RPC 2.0 message classification.
///
/// Determined by presence/absence of `id` and `method` fields:
/// - Request: has both `id` and `method`
/// - Response: has `id` but no `method`
/// - Notification: has `method` but no `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method` — a request expecting a response.
    Request {
        /// The request identifier.
        id: JsonRpcId,
        /// The method name.
        method: String,
    },
    /// Has `id` but no `method` — a response to a previous request.
    Response {
        /// The identifier of the request being answered.
        id: JsonRpcId,
    },
    /// Has `method` but no `id` — a fire-and-forget notification.
    Notification {
        /// The notification method name.
        method: String,
    },
}

/// Errors that can occur during JSON-RPC message classification.
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcClassifyError {
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a valid JSON-RPC ID.
    #[error("invalid id field")]
    InvalidId,
    /// The message has neither `id` nor `method` — cannot be classified.
    #[error("message has neither id nor method")]
    Unclassifiable,
}

/// Classify a parsed JSON-RPC value without taking ownership.
///
/// Validates the `"jsonrpc": "2.0"` version field, then classifies based on
/// the presence of `id` and `method` fields.
///
/// # Errors
///
/// Returns [`JsonRpcClassifyError`] for a missing/wrong version field, an
/// invalid `id` type, or a message with neither `id` nor `method`.
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    let version = value.get("jsonrpc").and_then(|v| v.as_str());
    if version != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|()| JsonRpcClassifyError::InvalidId)?;
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Parse a JSON value into a `JsonRpcId`.
///
/// Accepts string, integer, or null. Rejects floats, booleans, arrays,
/// objects.
fn parse_id(value: &Value) -> Result<JsonRpcId, ()> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or(()),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// The error object of a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC response as received from the upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// The identifier of the request being answered.
    pub id: JsonRpcId,
    /// The result payload on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// The error object on failure.
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Build a request frame.
#[must_use]
pub fn request_frame(id: &JsonRpcId, method: &str, params: Option<&Value>) -> Value {
    let mut frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if let (Some(obj), Some(params)) = (frame.as_object_mut(), params) {
        obj.insert("params".to_string(), params.clone());
    }
    frame
}

/// Build a notification frame (no `id`).
#[must_use]
pub fn notification_frame(method: &str, params: Option<&Value>) -> Value {
    let mut frame = json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let (Some(obj), Some(params)) = (frame.as_object_mut(), params) {
        obj.insert("params".to_string(), params.clone());
    }
    frame
}

/// Build a success-response frame.
#[must_use]
pub fn result_frame(id: &JsonRpcId, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error-response frame.
#[must_use]
pub fn error_frame(id: &JsonRpcId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}
