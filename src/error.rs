//! Error types for the relay.
//!
//! `RelayError` covers the connection-management and forwarding failure
//! classes: upstream unreachable after retries, session invalidation, errors
//! returned by the upstream server, and request deadlines. `FramingError`
//! covers NDJSON line parsing failures on the downstream stream.
//!
//! Connection-management failures are absorbed into state transitions plus a
//! bounded retry before anything here reaches a caller; once retries are
//! exhausted, errors propagate unmodified in shape.

use thiserror::Error;

/// Errors that can occur when parsing an NDJSON-framed JSON-RPC message.
///
/// Each variant maps to a specific failure mode on the downstream stream.
/// The serve loop uses these to generate JSON-RPC error responses rather
/// than terminating the endpoint.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A single NDJSON line exceeds the configured maximum size.
    ///
    /// Checked before JSON parsing to prevent allocation of oversized values.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum message size in bytes.
        max_bytes: usize,
    },

    /// The line is not valid JSON, or its structure is invalid for JSON-RPC.
    #[error("Malformed JSON: {reason}")]
    MalformedJson {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// The `jsonrpc` field is absent from the JSON object.
    #[error("Missing required jsonrpc field")]
    MissingVersion,

    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("Unsupported JSON-RPC version: {version}")]
    UnsupportedVersion {
        /// The version string found in the message.
        version: String,
    },

    /// The message is a JSON array, indicating a JSON-RPC batch request.
    ///
    /// MCP does not support batch requests.
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,
}

impl FramingError {
    /// JSON-RPC error code for a framing failure.
    ///
    /// Malformed input maps to parse error (-32700), everything else to
    /// invalid request (-32600).
    #[must_use]
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            FramingError::MalformedJson { .. } => -32700,
            _ => -32600,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the connection manager and the forwarding layer.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream unreachable or unvalidated after exhausting retries.
    ///
    /// Surfaced to callers of the connection guard and ultimately returned
    /// to the downstream client as a method failure.
    #[error("Not connected to SSE server: {reason}")]
    Connection {
        /// Human-readable description of the connection failure.
        reason: String,
    },

    /// The upstream rejected the logical session as unknown.
    ///
    /// A protocol-level failure, not a transport-level one: it can occur on
    /// a connection that still passes liveness probes, so the request
    /// forwarder handles it with its own forced reconnect.
    #[error("Upstream rejected session: {message}")]
    SessionInvalid {
        /// The rejection message reported by the upstream.
        message: String,
    },

    /// A JSON-RPC error object returned by the upstream server.
    ///
    /// Passed through unchanged to the downstream caller.
    #[error("Upstream error {code}: {message}")]
    Upstream {
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },

    /// A request or connect deadline was exceeded.
    #[error("Request timed out after {secs}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds.
        secs: u64,
    },

    /// The connect-phase protocol exchange failed.
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// Human-readable description of the handshake failure.
        reason: String,
    },

    /// The method is not bridged by this relay.
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// The unrecognized method name.
        method: String,
    },

    /// The upstream URL could not be parsed.
    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL that failed to parse.
        url: String,
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// The connection manager has been closed.
    #[error("Connection manager is closed")]
    Closed,

    /// A downstream NDJSON framing failure.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// A message could not be serialized for the wire.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying IO error on the downstream stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Shorthand for a [`RelayError::Connection`] with the given reason.
    pub fn connection(reason: impl Into<String>) -> Self {
        RelayError::Connection {
            reason: reason.into(),
        }
    }

    /// Whether this error marks the logical session as invalid.
    ///
    /// Classification happens where the error is created (HTTP body or
    /// JSON-RPC error message inspection in the SSE transport); this is a
    /// plain variant check.
    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, RelayError::SessionInvalid { .. })
    }

    /// JSON-RPC error code reported to the downstream client.
    ///
    /// Upstream errors keep their original code; relay-originated failures
    /// use the reserved server-error range.
    #[must_use]
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            RelayError::Upstream { code, .. } => *code,
            RelayError::Connection { .. } | RelayError::Closed => -32000,
            RelayError::Timeout { .. } => -32001,
            RelayError::SessionInvalid { .. } | RelayError::Handshake { .. } => -32002,
            RelayError::MethodNotFound { .. } => -32601,
            RelayError::Framing(e) => e.jsonrpc_code(),
            RelayError::InvalidUrl { .. } | RelayError::Json(_) | RelayError::Io(_) => -32603,
        }
    }
}

/// Detect the upstream's session-rejection message in an error payload.
///
/// The upstream reports an unknown session with a "Session not found" body
/// (HTTP) or error message (JSON-RPC); both are routed through this check.
#[must_use]
pub fn is_session_invalid_message(message: &str) -> bool {
    message.contains("Session not found")
}
