//! Resilient stdio-to-SSE bridge for MCP servers.
//!
//! A stdio MCP client on one side, an SSE MCP server on the other. The
//! relay's value is masking upstream connectivity loss: the stdio side
//! stays open and responsive while the upstream link is re-established,
//! retried, or has never succeeded.
//!
//! Layering, leaves first:
//!
//! - [`transport`] — JSON-RPC framing, the upstream SSE session, the
//!   downstream stdio endpoint.
//! - [`client`] — the stable logical upstream client; transports are
//!   recreated underneath it on reconnect.
//! - [`connection`] — the state machine, availability monitor, and the
//!   `with_connection` retry guard.
//! - [`forward`] — capability-gated request bridging and best-effort
//!   notification bridging.
//! - [`server`] — downstream wiring and the serve loop.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod forward;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::UpstreamClient;
pub use config::{DEFAULT_SSE_URL, UpstreamConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{FramingError, RelayError};
pub use forward::{NotificationForwarder, RequestForwarder, RouteTable};
pub use server::ProxyServer;
