//! Wire transports: JSON-RPC framing, the upstream SSE session, and the
//! downstream stdio endpoint.
//!
//! The connection manager owns session lifecycles; nothing above this layer
//! constructs or tears down transports directly.

pub mod jsonrpc;
pub mod sse;
pub mod stdio;

pub use jsonrpc::{JsonRpcId, JsonRpcMessageKind, JsonRpcResponse, classify_jsonrpc};
pub use sse::{SseSession, UpstreamNotification};
pub use stdio::{DownstreamSink, StdioEndpoint};
