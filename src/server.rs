//! The downstream-facing proxy server.
//!
//! Wires the connection manager, forwarders, and stdio endpoint together.
//! The server is fail-open: the downstream endpoint is exposed whether or
//! not the initial upstream attempt succeeded, and requests issued before
//! the upstream recovers surface connection errors until the monitor
//! converges.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::UpstreamConfig;
use crate::connection::ConnectionManager;
use crate::error::RelayError;
use crate::forward::{NotificationForwarder, RequestForwarder};
use crate::protocol::capability::{Implementation, ServerCapabilities};
use crate::transport::jsonrpc::{JsonRpcId, JsonRpcMessageKind};
use crate::transport::sse::UpstreamNotification;
use crate::transport::stdio::{StdioEndpoint, parse_frame};

/// Buffered upstream notifications awaiting the forwarder.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// The stdio-facing proxy endpoint.
pub struct ProxyServer {
    manager: Arc<ConnectionManager>,
    endpoint: Arc<StdioEndpoint>,
    requests: Arc<RequestForwarder>,
    identity: Implementation,
    capabilities: ServerCapabilities,
}

impl ProxyServer {
    /// Construct the proxy and perform the startup connection attempt.
    ///
    /// The downstream endpoint is usable regardless of the attempt's
    /// outcome. Identity and capabilities mirror the upstream's first
    /// handshake, or fall back to this relay's own identity and an empty
    /// capability set when the upstream was unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] for an unusable upstream URL;
    /// connectivity failures are absorbed, not surfaced.
    pub async fn start(
        config: UpstreamConfig,
    ) -> Result<(Self, mpsc::Receiver<UpstreamNotification>), RelayError> {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let manager = ConnectionManager::new(config.clone(), notify_tx)?;

        let endpoint = Arc::new(StdioEndpoint::new());
        manager.set_downstream(endpoint.clone());

        if !manager.connect().await {
            warn!("initial connection failed; check that the server is running and the URL is correct");
            info!("will reconnect automatically when the server becomes available");
        }

        let handshake = manager.client().first_handshake();
        let capabilities = handshake
            .map(|h| h.capabilities.clone())
            .unwrap_or_default();
        let identity = handshake
            .and_then(|h| h.server_info.clone())
            .unwrap_or_else(|| Implementation {
                name: config.client_name.clone(),
                version: config.client_version.clone(),
            });
        info!(
            server = %identity.name,
            version = %identity.version,
            "downstream endpoint mirrors upstream identity"
        );

        let requests = Arc::new(RequestForwarder::new(manager.clone(), &capabilities));

        Ok((
            Self {
                manager,
                endpoint,
                requests,
                identity,
                capabilities,
            },
            notify_rx,
        ))
    }

    /// Identity declared on the downstream side.
    #[must_use]
    pub fn identity(&self) -> &Implementation {
        &self.identity
    }

    /// Capability set declared on the downstream side.
    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// The connection manager backing this server.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Serve the downstream endpoint until stdin closes, then shut down.
    ///
    /// Requests are dispatched on their own tasks so slow upstream calls do
    /// not block the read loop; responses are serialized through the shared
    /// stdout handle.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the stdin stream.
    pub async fn serve(self, notify_rx: mpsc::Receiver<UpstreamNotification>) -> Result<(), RelayError> {
        let notifications =
            NotificationForwarder::new(self.manager.clone(), self.endpoint.clone());
        let pump = tokio::spawn(notifications.run(notify_rx));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_frame(&line) {
                Ok((JsonRpcMessageKind::Request { id, method }, params)) => {
                    let requests = self.requests.clone();
                    let endpoint = self.endpoint.clone();
                    tokio::spawn(async move {
                        let write_outcome = match requests.handle(&method, params).await {
                            Ok(result) => endpoint.write_result(&id, &result).await,
                            Err(e) => {
                                warn!(method, error = %e, "request failed");
                                endpoint
                                    .write_error(&id, e.jsonrpc_code(), &e.to_string())
                                    .await
                            }
                        };
                        if let Err(e) = write_outcome {
                            error!(method, error = %e, "failed to write response downstream");
                        }
                    });
                }
                Ok((JsonRpcMessageKind::Notification { method }, _)) => {
                    // Client-originated notifications have no upstream
                    // counterpart on this path.
                    debug!(method, "ignoring downstream notification");
                }
                Ok((JsonRpcMessageKind::Response { id }, _)) => {
                    debug!(?id, "ignoring unexpected response frame on stdin");
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse downstream frame");
                    if let Err(write_err) = self
                        .endpoint
                        .write_error(&JsonRpcId::Null, e.jsonrpc_code(), &e.to_string())
                        .await
                    {
                        error!(error = %write_err, "failed to report framing error downstream");
                    }
                }
            }
        }

        info!("downstream stream closed, shutting down");
        pump.abort();
        self.manager.close().await;
        Ok(())
    }
}

/// Run the proxy until the downstream endpoint closes.
///
/// # Errors
///
/// Returns startup failures ([`RelayError::InvalidUrl`]) and fatal IO errors
/// on the downstream stream.
pub async fn run(config: UpstreamConfig) -> Result<(), RelayError> {
    let (server, notify_rx) = ProxyServer::start(config).await?;
    server.serve(notify_rx).await
}
