//! Logical upstream MCP client.
//!
//! One `UpstreamClient` per connection manager. The client is the stable
//! handle callers hold across reconnects: each (re)connect swaps in a fresh
//! [`SseSession`] behind the `RwLock` and replays the protocol handshake,
//! while request ids keep counting from the same sequence.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};

use reqwest::Url;
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::protocol::capability::{InitializeResult, PROTOCOL_VERSION};
use crate::protocol::methods;
use crate::transport::sse::{SseSession, UpstreamNotification};

/// The upstream client: stable across reconnects, transport swapped inside.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    config: UpstreamConfig,
    session: RwLock<Option<SseSession>>,
    next_id: AtomicI64,
    notify_tx: mpsc::Sender<UpstreamNotification>,
    /// Handshake result captured at the first successful connection.
    ///
    /// Deliberately never overwritten: capability mirroring is decided once
    /// (a capability gained after a later reconnect is not retroactively
    /// exposed).
    first_handshake: OnceLock<InitializeResult>,
}

impl UpstreamClient {
    /// Create a client for the configured endpoint.
    ///
    /// Builds the persistent HTTP client with the configured connect
    /// timeout. No overall client timeout is set: the SSE stream must be
    /// able to outlive any single request deadline, so request timeouts are
    /// applied per call instead.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] when the base URL does not parse.
    pub fn new(
        config: UpstreamConfig,
        notify_tx: mpsc::Sender<UpstreamNotification>,
    ) -> Result<Self, RelayError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| RelayError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::InvalidUrl {
                url: config.base_url.clone(),
                reason: "URL cannot serve as a base".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RelayError::connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            config,
            session: RwLock::new(None),
            next_id: AtomicI64::new(1),
            notify_tx,
            first_handshake: OnceLock::new(),
        })
    }

    /// Establish a fresh session and perform the protocol handshake.
    ///
    /// Any existing session is torn down first; on success the new session
    /// replaces it atomically from the callers' perspective.
    ///
    /// # Errors
    ///
    /// Returns transport errors from session setup and handshake failures
    /// from the `initialize` exchange.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let mut slot = self.session.write().await;
        if let Some(old) = slot.take() {
            old.close().await;
        }

        let session = SseSession::connect(
            &self.http,
            &self.base_url,
            self.config.connect_timeout,
            self.config.request_timeout,
            self.notify_tx.clone(),
        )
        .await?;

        let handshake = self.handshake(&session).await?;
        debug!(
            server = handshake
                .server_info
                .as_ref()
                .map_or("unknown", |info| info.name.as_str()),
            protocol = %handshake.protocol_version,
            "handshake complete"
        );
        let _ = self.first_handshake.set(handshake);

        *slot = Some(session);
        Ok(())
    }

    /// Run the `initialize` / `notifications/initialized` exchange.
    async fn handshake(&self, session: &SseSession) -> Result<InitializeResult, RelayError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            },
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let raw = session
            .send_request(id, methods::INITIALIZE, Some(&params))
            .await?;
        let result: InitializeResult =
            serde_json::from_value(raw).map_err(|e| RelayError::Handshake {
                reason: format!("malformed initialize result: {e}"),
            })?;
        session
            .send_notification(methods::NOTIF_INITIALIZED, None)
            .await?;
        Ok(result)
    }

    /// Forward a request to the upstream and return its result unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connection`] when no session is established,
    /// otherwise whatever the session reports.
    pub async fn request(&self, method: &str, params: Option<&Value>) -> Result<Value, RelayError> {
        let slot = self.session.read().await;
        let session = slot
            .as_ref()
            .ok_or_else(|| RelayError::connection("no upstream session"))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        session.send_request(id, method, params).await
    }

    /// Send a notification to the upstream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connection`] when no session is established,
    /// otherwise whatever the session reports.
    pub async fn notify(&self, method: &str, params: Option<&Value>) -> Result<(), RelayError> {
        let slot = self.session.read().await;
        let session = slot
            .as_ref()
            .ok_or_else(|| RelayError::connection("no upstream session"))?;
        session.send_notification(method, params).await
    }

    /// Liveness probe: a `ping` round-trip.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying request reports.
    pub async fn ping(&self) -> Result<(), RelayError> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// The handshake captured at the first successful connection, if any.
    #[must_use]
    pub fn first_handshake(&self) -> Option<&InitializeResult> {
        self.first_handshake.get()
    }

    /// Tear down the current session, if any.
    pub async fn close(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(url: &str) -> Result<UpstreamClient, RelayError> {
        let (tx, _rx) = mpsc::channel(8);
        UpstreamClient::new(UpstreamConfig::with_base_url(url), tx)
    }

    #[test]
    fn test_new_with_valid_url() {
        assert!(test_client("http://localhost:9876").is_ok());
    }

    #[test]
    fn test_new_with_invalid_url() {
        let result = test_client("not a url");
        assert!(matches!(result, Err(RelayError::InvalidUrl { .. })));
    }

    #[test]
    fn test_new_with_non_base_url() {
        let result = test_client("mailto:proxy@example.com");
        assert!(matches!(result, Err(RelayError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_request_without_session_fails() {
        let client = test_client("http://localhost:9876").unwrap();
        let err = client.request(methods::PING, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Connection { .. }));
        assert!(client.first_handshake().is_none());
    }
}
