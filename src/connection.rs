//! Upstream connection lifecycle: state machine, availability monitor, and
//! the retry-guarded connection primitive.
//!
//! The manager owns the single upstream client and is the only component
//! that connects, reconnects, or tears transports down. Everything above it
//! funnels upstream work through [`ConnectionManager::with_connection`],
//! which hides transient connectivity loss behind a bounded
//! reconnect-and-retry policy.
//!
//! State lives in a `tokio::sync::watch` channel: transitions go through
//! `send_if_modified`, whose closure runs under the channel lock, so the
//! connecting-exclusivity check-and-set is atomic and subscribers (tests,
//! the monitor) can await transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::UpstreamClient;
use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::protocol::methods::{NOTIF_RESOURCES_LIST_CHANGED, NOTIF_TOOLS_LIST_CHANGED};
use crate::transport::sse::UpstreamNotification;
use crate::transport::stdio::DownstreamSink;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live upstream session.
    Disconnected,
    /// A connection attempt is in flight. Mutually exclusive: a second
    /// attempt while in this state is rejected instead of racing.
    Connecting,
    /// Session established and handshake complete.
    Connected,
}

/// Outcome of a single guarded connection attempt.
enum ConnectOutcome {
    /// Another attempt already holds the `Connecting` state.
    AlreadyConnecting,
    /// Session established.
    Connected,
    /// Attempt failed; state is back to `Disconnected`.
    Failed,
}

/// Owns the upstream connection, its state machine, and the availability
/// monitor.
pub struct ConnectionManager {
    client: Arc<UpstreamClient>,
    config: UpstreamConfig,
    state_tx: watch::Sender<ConnectionState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    /// Downstream sink for availability notifications, wired in by the
    /// proxy server once the endpoint exists.
    sink: OnceCell<Arc<dyn DownstreamSink>>,
    /// Weak self-handle for spawning the monitor from `&self` methods.
    weak_self: Weak<Self>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager for the configured upstream endpoint.
    ///
    /// Upstream notifications received over any session are delivered to
    /// `notify_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] when the configured URL does not
    /// parse.
    pub fn new(
        config: UpstreamConfig,
        notify_tx: mpsc::Sender<UpstreamNotification>,
    ) -> Result<Arc<Self>, RelayError> {
        let client = Arc::new(UpstreamClient::new(config.clone(), notify_tx)?);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Arc::new_cyclic(|weak_self| Self {
            client,
            config,
            state_tx,
            monitor: Mutex::new(None),
            sink: OnceCell::new(),
            weak_self: weak_self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The stable upstream client handle.
    #[must_use]
    pub fn client(&self) -> &Arc<UpstreamClient> {
        &self.client
    }

    /// Wire in the downstream sink used for availability notifications.
    ///
    /// May only be set once; later calls are ignored.
    pub fn set_downstream(&self, sink: Arc<dyn DownstreamSink>) {
        let _ = self.sink.set(sink);
    }

    /// Force the state to `Disconnected`.
    ///
    /// Used by the request forwarder when the upstream invalidates the
    /// session on a connection that still passes liveness probes.
    pub fn force_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Atomically claim the `Connecting` state.
    ///
    /// Returns false when another attempt already holds it. The closure
    /// runs under the watch channel's lock, closing the check-then-set race
    /// between concurrent callers.
    fn begin_connecting(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                false
            } else {
                *state = ConnectionState::Connecting;
                true
            }
        })
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// One guarded connection attempt: claim `Connecting`, establish the
    /// session, settle into `Connected` or `Disconnected`.
    async fn try_connect(&self) -> ConnectOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return ConnectOutcome::Failed;
        }
        if !self.begin_connecting() {
            return ConnectOutcome::AlreadyConnecting;
        }

        match self.client.connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!(url = %self.config.base_url, "connected to SSE server");
                ConnectOutcome::Connected
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(url = %self.config.base_url, error = %e, "failed to connect to SSE server");
                ConnectOutcome::Failed
            }
        }
    }

    /// Attempt a single connection.
    ///
    /// Returns false immediately when an attempt is already in flight. On
    /// failure the availability monitor is started; on success a running
    /// monitor is stopped.
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            ConnectOutcome::AlreadyConnecting => false,
            ConnectOutcome::Connected => {
                self.stop_monitoring().await;
                true
            }
            ConnectOutcome::Failed => {
                self.start_monitoring().await;
                false
            }
        }
    }

    /// Reconnect with linear backoff.
    ///
    /// Attempt N waits N × the configured backoff unit after a failure.
    /// A successful transport connect still requires the availability
    /// notifications to reach the downstream client before the call reports
    /// success; a failed push reverts to `Disconnected` and is not retried
    /// within this call.
    pub async fn reconnect_with_retries(&self, max_attempts: u32) -> bool {
        if !self.begin_connecting() {
            return false;
        }
        info!(url = %self.config.base_url, "attempting to reconnect to SSE server");

        for attempt in 1..=max_attempts {
            if self.closed.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return false;
            }
            match self.client.connect().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    info!(attempt, max_attempts, "reconnected to SSE server");
                    if self.push_availability().await {
                        self.stop_monitoring().await;
                        return true;
                    }
                    // push_availability reverted the state already.
                    return false;
                }
                Err(e) => {
                    if attempt < max_attempts {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "reconnection attempt failed, retrying"
                        );
                        tokio::time::sleep(self.config.backoff_unit * attempt).await;
                    } else {
                        error!(
                            attempts = max_attempts,
                            error = %e,
                            "failed to reconnect"
                        );
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            }
        }

        false
    }

    /// Run an operation against a valid connection.
    ///
    /// The resilience primitive everything above builds on:
    ///
    /// 1. When the state is not `Connected`, or the liveness probe fails,
    ///    one reconnect cycle runs first; if it fails, the monitor is
    ///    started and a connection error is returned.
    /// 2. The operation runs against the stable client handle. On failure
    ///    the state drops to `Disconnected` and one reconnect cycle runs;
    ///    if it succeeds the operation is retried exactly once and that
    ///    outcome is final.
    ///
    /// # Errors
    ///
    /// [`RelayError::Connection`] when reconnection fails; otherwise the
    /// operation's own error from its final attempt.
    pub async fn with_connection<T, F, Fut>(&self, operation: F) -> Result<T, RelayError>
    where
        F: Fn(Arc<UpstreamClient>) -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }

        if self.state() != ConnectionState::Connected || !self.is_connection_valid().await {
            if !self
                .reconnect_with_retries(self.config.max_reconnect_attempts)
                .await
            {
                self.start_monitoring().await;
                return Err(RelayError::connection("SSE server is unavailable"));
            }
        }

        match operation(Arc::clone(&self.client)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "operation failed, attempting reconnect");
                self.set_state(ConnectionState::Disconnected);

                if self
                    .reconnect_with_retries(self.config.max_reconnect_attempts)
                    .await
                {
                    info!("reconnected, retrying operation");
                    match operation(Arc::clone(&self.client)).await {
                        Ok(value) => Ok(value),
                        Err(retry_err) => {
                            error!(error = %retry_err, "operation failed after reconnection");
                            self.set_state(ConnectionState::Disconnected);
                            self.start_monitoring().await;
                            Err(retry_err)
                        }
                    }
                } else {
                    self.start_monitoring().await;
                    Err(RelayError::connection(format!(
                        "SSE server is unavailable after reconnection attempts: {e}"
                    )))
                }
            }
        }
    }

    /// Liveness probe: ping the upstream over the current session.
    async fn is_connection_valid(&self) -> bool {
        match self.client.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "connection validation failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Push the availability notifications downstream.
    ///
    /// The two list-changed notifications prompt the downstream client to
    /// refresh its cached listings after a recovery. A push failure is
    /// treated as a connection failure: state reverts to `Disconnected`.
    async fn push_availability(&self) -> bool {
        let Some(sink) = self.sink.get() else {
            // No downstream wired yet (startup, bare-manager tests);
            // nothing to refresh.
            return true;
        };

        let result = async {
            sink.send_notification(NOTIF_TOOLS_LIST_CHANGED, None).await?;
            sink.send_notification(NOTIF_RESOURCES_LIST_CHANGED, None)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                info!("availability notifications sent");
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "failed to send availability notifications, treating as connection failure"
                );
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Availability Monitor
    // ─────────────────────────────────────────────────────────────────────

    /// Start the availability monitor unless one is already running.
    async fn start_monitoring(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // The manager is always behind an Arc (see `new`); the upgrade only
        // fails during final teardown, when no monitor should start anyway.
        let Some(manager) = self.weak_self.upgrade() else {
            return;
        };
        let mut slot = self.monitor.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(async move {
            manager.monitor_loop().await;
        }));
    }

    /// Stop the availability monitor, if running.
    async fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }
    }

    /// Whether a monitor task is currently live.
    pub async fn monitor_active(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Poll for the upstream to become reachable again.
    ///
    /// Runs only while the state is not `Connected`; never attempts while
    /// another attempt holds `Connecting`. Terminates itself once a
    /// reconnect plus availability push has fully succeeded.
    async fn monitor_loop(self: Arc<Self>) {
        info!("monitoring SSE server availability");
        while !self.closed.load(Ordering::SeqCst) && self.state() != ConnectionState::Connected {
            tokio::time::sleep(self.config.monitor_interval).await;
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            if self.state() != ConnectionState::Disconnected {
                continue;
            }
            if matches!(self.try_connect().await, ConnectOutcome::Connected)
                && self.push_availability().await
            {
                info!(url = %self.config.base_url, "SSE server is now available");
                break;
            }
            // Failed attempt or failed push: state is back to
            // Disconnected, keep polling.
        }
        debug!("availability monitor stopped");
    }

    /// Close the manager: stop the monitor, tear down the session.
    ///
    /// Idempotent. In-flight caller operations may still observe a late
    /// failure, but no further attempts are launched.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_monitoring().await;
        self.client.close().await;
        self.set_state(ConnectionState::Disconnected);
        info!("connection manager closed");
    }
}
