//! Upstream notification forwarding.
//!
//! A fixed set of upstream notification kinds is re-emitted on the
//! downstream endpoint. Delivery is best-effort: a forwarding failure is
//! logged and swallowed, never surfaced back to the upstream source.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::protocol::methods::is_bridged_notification;
use crate::transport::sse::UpstreamNotification;
use crate::transport::stdio::DownstreamSink;

/// Re-emits upstream notifications on the downstream endpoint.
pub struct NotificationForwarder {
    manager: Arc<ConnectionManager>,
    sink: Arc<dyn DownstreamSink>,
}

impl NotificationForwarder {
    /// Build a forwarder writing to the given downstream sink.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, sink: Arc<dyn DownstreamSink>) -> Self {
        Self { manager, sink }
    }

    /// Forward one upstream notification downstream.
    ///
    /// Kinds outside the bridged set are dropped. Delivery goes through the
    /// connection guard so a dead connection is recovered (or reported)
    /// before the push; any failure ends here.
    pub async fn handle(&self, method: &str, params: Option<Value>) {
        if !is_bridged_notification(method) {
            debug!(method, "dropping unbridged upstream notification");
            return;
        }

        let sink = Arc::clone(&self.sink);
        let method_owned = method.to_string();
        let result = self
            .manager
            .with_connection(move |_client| {
                let sink = Arc::clone(&sink);
                let method = method_owned.clone();
                let params = params.clone();
                async move { sink.send_notification(&method, params).await }
            })
            .await;

        if let Err(e) = result {
            warn!(method, error = %e, "failed to forward notification downstream");
        }
    }

    /// Drain the upstream notification channel until it closes.
    pub async fn run(self, mut rx: mpsc::Receiver<UpstreamNotification>) {
        while let Some(notification) = rx.recv().await {
            self.handle(&notification.method, notification.params).await;
        }
        debug!("upstream notification channel closed");
    }
}
