//! Downstream NDJSON endpoint over stdin/stdout.
//!
//! The serve loop reads one JSON-RPC message per line from stdin;
//! [`parse_frame`] validates and classifies each line. All writes go through
//! a shared stdout handle behind a mutex so concurrently completing request
//! tasks cannot interleave lines.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::error::{FramingError, RelayError};
use crate::transport::jsonrpc::{
    JsonRpcClassifyError, JsonRpcId, JsonRpcMessageKind, classify_jsonrpc, error_frame,
    notification_frame, result_frame,
};

/// Maximum NDJSON message size (10 MB).
///
/// Lines exceeding this limit are rejected before JSON parsing to prevent
/// allocation of oversized `serde_json::Value` trees from crafted input.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Parse a single NDJSON line into its message kind and params.
///
/// Performs size validation, JSON parsing, batch rejection, and JSON-RPC
/// classification in sequence. The `params` field is extracted from the
/// parsed value to avoid re-parsing downstream.
///
/// # Errors
///
/// Returns [`FramingError`] for oversized messages, invalid JSON, JSON
/// arrays (batch requests), a missing or wrong `jsonrpc` version, and
/// unclassifiable messages.
pub fn parse_frame(line: &str) -> Result<(JsonRpcMessageKind, Option<Value>), FramingError> {
    // Size check on raw byte length before any JSON parsing.
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FramingError::MalformedJson {
            reason: "empty message".to_string(),
        });
    }

    let mut value: Value =
        serde_json::from_str(trimmed).map_err(|e| FramingError::MalformedJson {
            reason: e.to_string(),
        })?;

    if value.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }

    let kind = classify_jsonrpc(&value).map_err(|e| match e {
        JsonRpcClassifyError::InvalidVersion => {
            // Disambiguate: missing vs wrong version.
            match value.get("jsonrpc").and_then(|v| v.as_str()) {
                Some(v) => FramingError::UnsupportedVersion {
                    version: v.to_string(),
                },
                None => FramingError::MissingVersion,
            }
        }
        JsonRpcClassifyError::InvalidId => FramingError::MalformedJson {
            reason: "invalid id field".to_string(),
        },
        JsonRpcClassifyError::Unclassifiable => FramingError::MalformedJson {
            reason: "message has neither id nor method".to_string(),
        },
    })?;

    let params = value.as_object_mut().and_then(|obj| obj.remove("params"));

    Ok((kind, params))
}

// ─────────────────────────────────────────────────────────────────────────────
// Downstream Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Write half of the downstream endpoint.
///
/// Abstracted behind a trait so the notification forwarder and the
/// availability push can be tested against a recording sink instead of a
/// real stdout.
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    /// Push a notification frame to the downstream client.
    async fn send_notification(&self, method: &str, params: Option<Value>)
    -> Result<(), RelayError>;
}

/// The stdout side of the downstream endpoint.
///
/// One line per JSON-RPC message, writes serialized through a mutex.
pub struct StdioEndpoint {
    stdout: Arc<Mutex<Stdout>>,
}

impl StdioEndpoint {
    /// Create an endpoint over this process's stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
        }
    }

    /// Serialize a frame and write it as one NDJSON line.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the underlying stream.
    pub async fn write_frame(&self, frame: &Value) -> Result<(), RelayError> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    /// Write a success response for the given request id.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the underlying stream.
    pub async fn write_result(&self, id: &JsonRpcId, result: &Value) -> Result<(), RelayError> {
        self.write_frame(&result_frame(id, result)).await
    }

    /// Write an error response for the given request id.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the underlying stream.
    pub async fn write_error(
        &self,
        id: &JsonRpcId,
        code: i64,
        message: &str,
    ) -> Result<(), RelayError> {
        self.write_frame(&error_frame(id, code, message)).await
    }
}

impl Default for StdioEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownstreamSink for StdioEndpoint {
    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), RelayError> {
        self.write_frame(&notification_frame(method, params.as_ref()))
            .await
    }
}
