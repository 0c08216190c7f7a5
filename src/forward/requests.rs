//! Downstream request forwarding.
//!
//! An explicit dispatch table keyed by method name decides which requests
//! the relay bridges; the table is built once from the capability set the
//! upstream declared at its first handshake. Every bridged request forwards
//! through the connection guard, with one extra recovery layer for
//! session-invalid failures, which can occur on a connection that still
//! passes liveness probes.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::RelayError;
use crate::protocol::capability::ServerCapabilities;
use crate::protocol::methods;

/// The set of downstream request methods bridged to the upstream.
///
/// Capability-gated entries follow the upstream's first handshake:
/// list methods need the matching `listChanged` flag, read/subscribe-family
/// methods only need the capability group to be present.
#[derive(Debug, Clone)]
pub struct RouteTable {
    methods: HashSet<&'static str>,
}

impl RouteTable {
    /// Build the table for a declared capability set.
    #[must_use]
    pub fn for_capabilities(capabilities: &ServerCapabilities) -> Self {
        let mut table: HashSet<&'static str> = HashSet::from([
            methods::INITIALIZE,
            methods::TOOLS_LIST,
            methods::TOOLS_CALL,
            methods::SAMPLING_CREATE_MESSAGE,
            methods::ROOTS_LIST,
            methods::PING,
            methods::LOGGING_SET_LEVEL,
        ]);

        if capabilities.resources_list_changed() {
            table.insert(methods::RESOURCES_LIST);
        }
        if capabilities.has_resources() {
            table.insert(methods::RESOURCES_READ);
            table.insert(methods::RESOURCES_SUBSCRIBE);
            table.insert(methods::RESOURCES_UNSUBSCRIBE);
            table.insert(methods::RESOURCES_TEMPLATES_LIST);
        }
        if capabilities.prompts_list_changed() {
            table.insert(methods::PROMPTS_LIST);
        }
        if capabilities.has_prompts() {
            table.insert(methods::PROMPTS_GET);
        }

        Self { methods: table }
    }

    /// Whether the given method is bridged.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty (never the case in practice).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Forwarder
// ─────────────────────────────────────────────────────────────────────────────

/// Bridges downstream requests to the upstream through the connection guard.
pub struct RequestForwarder {
    manager: Arc<ConnectionManager>,
    routes: RouteTable,
}

impl RequestForwarder {
    /// Build a forwarder whose dispatch table is gated on the given
    /// capability set.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, capabilities: &ServerCapabilities) -> Self {
        let routes = RouteTable::for_capabilities(capabilities);
        info!(methods = routes.len(), "request routes registered");
        Self { manager, routes }
    }

    /// The dispatch table in use.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle one downstream request.
    ///
    /// Unbridged methods are rejected with a method-not-found error.
    /// Session-invalid failures force the state to `Disconnected`, perform
    /// one direct connect, and retry the call exactly once; on failed
    /// recovery the original error is surfaced unchanged.
    ///
    /// # Errors
    ///
    /// [`RelayError::MethodNotFound`] for unbridged methods, otherwise the
    /// forwarded call's error after the retry policy has run its course.
    pub async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RelayError> {
        if !self.routes.contains(method) {
            return Err(RelayError::MethodNotFound {
                method: method.to_string(),
            });
        }

        match self.forward(method, params.as_ref()).await {
            Err(e) if e.is_session_invalid() => {
                warn!(
                    method,
                    "session invalidated by upstream, triggering reconnection"
                );
                self.manager.force_disconnected();
                if self.manager.connect().await {
                    info!(method, "reconnection successful, retrying method");
                    self.forward(method, params.as_ref()).await
                } else {
                    Err(e)
                }
            }
            outcome => outcome,
        }
    }

    /// Forward a request upstream through the connection guard.
    async fn forward(&self, method: &str, params: Option<&Value>) -> Result<Value, RelayError> {
        let method = method.to_string();
        let params = params.cloned();
        self.manager
            .with_connection(move |client| {
                let method = method.clone();
                let params = params.clone();
                async move { client.request(&method, params.as_ref()).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capability::{PromptsCapability, ResourcesCapability};

    #[test]
    fn test_route_table_minimal_capabilities() {
        let table = RouteTable::for_capabilities(&ServerCapabilities::default());
        assert!(table.contains(methods::INITIALIZE));
        assert!(table.contains(methods::TOOLS_LIST));
        assert!(table.contains(methods::TOOLS_CALL));
        assert!(table.contains(methods::SAMPLING_CREATE_MESSAGE));
        assert!(table.contains(methods::ROOTS_LIST));
        assert!(table.contains(methods::PING));
        assert!(table.contains(methods::LOGGING_SET_LEVEL));
        assert_eq!(table.len(), 7);

        assert!(!table.contains(methods::RESOURCES_LIST));
        assert!(!table.contains(methods::RESOURCES_READ));
        assert!(!table.contains(methods::PROMPTS_LIST));
        assert!(!table.contains(methods::PROMPTS_GET));
    }

    #[test]
    fn test_route_table_resources_without_list_changed() {
        let capabilities = ServerCapabilities {
            resources: Some(ResourcesCapability::default()),
            ..ServerCapabilities::default()
        };
        let table = RouteTable::for_capabilities(&capabilities);
        // Read-family methods need only capability presence.
        assert!(table.contains(methods::RESOURCES_READ));
        assert!(table.contains(methods::RESOURCES_SUBSCRIBE));
        assert!(table.contains(methods::RESOURCES_UNSUBSCRIBE));
        assert!(table.contains(methods::RESOURCES_TEMPLATES_LIST));
        // List needs the listChanged flag.
        assert!(!table.contains(methods::RESOURCES_LIST));
    }

    #[test]
    fn test_route_table_resources_with_list_changed() {
        let capabilities = ServerCapabilities {
            resources: Some(ResourcesCapability {
                list_changed: Some(true),
                ..ResourcesCapability::default()
            }),
            ..ServerCapabilities::default()
        };
        let table = RouteTable::for_capabilities(&capabilities);
        assert!(table.contains(methods::RESOURCES_LIST));
        assert!(table.contains(methods::RESOURCES_READ));
    }

    #[test]
    fn test_route_table_prompts_gating() {
        let capabilities = ServerCapabilities {
            prompts: Some(PromptsCapability {
                list_changed: Some(false),
            }),
            ..ServerCapabilities::default()
        };
        let table = RouteTable::for_capabilities(&capabilities);
        assert!(table.contains(methods::PROMPTS_GET));
        assert!(!table.contains(methods::PROMPTS_LIST));

        let capabilities = ServerCapabilities {
            prompts: Some(PromptsCapability {
                list_changed: Some(true),
            }),
            ..ServerCapabilities::default()
        };
        let table = RouteTable::for_capabilities(&capabilities);
        assert!(table.contains(methods::PROMPTS_LIST));
        assert!(table.contains(methods::PROMPTS_GET));
    }

    #[test]
    fn test_route_table_rejects_notifications() {
        let table = RouteTable::for_capabilities(&ServerCapabilities::default());
        assert!(!table.contains(methods::NOTIF_INITIALIZED));
        assert!(!table.contains(methods::NOTIF_TOOLS_LIST_CHANGED));
        assert!(!table.contains("unknown/method"));
    }
}
