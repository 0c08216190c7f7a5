//! Mock MCP SSE server for integration testing.
//!
//! Speaks the same transport as a real upstream: `GET /sse` opens an event
//! stream whose first event names the POST endpoint (with a per-connection
//! session id), responses to POSTed requests are delivered back over the
//! stream. Configurable per-method failures and session invalidation drive
//! the reconnection scenarios.
//!
//! Note: Some methods are provided for future test expansion and may not
//! be used by every test binary. They are covered by `#[allow(dead_code)]`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use futures::StreamExt;
use futures::stream::Stream;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Builder for a mock upstream server.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    tools: HashMap<String, Value>,
    capabilities: Value,
    connect_delay: Option<Duration>,
}

impl MockUpstream {
    /// Create a mock with no tools and a tools-only capability set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            capabilities: json!({ "tools": { "listChanged": true } }),
            connect_delay: None,
        }
    }

    /// Add a tool with a fixed `tools/call` result.
    #[must_use]
    pub fn with_tool(mut self, name: &str, result: Value) -> Self {
        self.tools.insert(name.to_string(), result);
        self
    }

    /// Override the capability set declared during `initialize`.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Delay the SSE handshake, for racing concurrent connect attempts.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Start on an ephemeral port.
    pub async fn start(self) -> MockHandle {
        self.start_on(0).await
    }

    /// Start on a specific port (0 = ephemeral). Used to restart a stopped
    /// mock on the address a relay is already configured for.
    pub async fn start_on(self, port: u16) -> MockHandle {
        let state = Arc::new(MockState {
            tools: self.tools,
            capabilities: self.capabilities,
            connect_delay: self.connect_delay,
            session: RwLock::new(None),
            session_counter: AtomicU32::new(0),
            session_invalidated: AtomicBool::new(false),
            method_failures: RwLock::new(HashMap::new()),
            method_counts: RwLock::new(HashMap::new()),
            sse_connects: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/sse", get(handle_sse))
            .route("/message", post(handle_message))
            .with_state(state.clone());

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("failed to bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream has no addr");

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockHandle { addr, state, task }
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running mock upstream.
pub struct MockHandle {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockHandle {
    /// Base URL of the mock (the relay's `--sse-url`).
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The bound port, for restarting on the same address.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop the server, closing the SSE stream and freeing the port.
    pub fn stop(self) {
        self.task.abort();
    }

    /// Number of SSE connections accepted (one per relay session).
    pub fn sse_connects(&self) -> u32 {
        self.state.sse_connects.load(Ordering::SeqCst)
    }

    /// Number of requests received for a method.
    pub async fn method_count(&self, method: &str) -> u32 {
        self.state
            .method_counts
            .read()
            .await
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Reject all POSTs with an HTTP 404 "Session not found" until the next
    /// SSE connection establishes a fresh session.
    pub fn invalidate_session(&self) {
        self.state.session_invalidated.store(true, Ordering::SeqCst);
    }

    /// Push a server-originated notification over the current SSE stream.
    pub async fn push_notification(&self, method: &str, params: Option<Value>) {
        let session = self.state.session.read().await;
        let Some(session) = session.as_ref() else {
            panic!("no live SSE session to push on");
        };
        let mut frame = json!({ "jsonrpc": "2.0", "method": method });
        if let (Some(obj), Some(params)) = (frame.as_object_mut(), params) {
            obj.insert("params".to_string(), params);
        }
        let _ = session.tx.send(frame.to_string());
    }

    /// Fail the next `count` invocations of `method` with a JSON-RPC error
    /// carrying the given message. Survives session re-establishment.
    pub async fn fail_method(&self, method: &str, count: u32, message: &str) {
        self.state.method_failures.write().await.insert(
            method.to_string(),
            MethodFailure {
                remaining: count,
                message: message.to_string(),
            },
        );
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server State & Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct MethodFailure {
    remaining: u32,
    message: String,
}

#[derive(Debug)]
struct Session {
    id: String,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Debug)]
struct MockState {
    tools: HashMap<String, Value>,
    capabilities: Value,
    connect_delay: Option<Duration>,
    session: RwLock<Option<Session>>,
    session_counter: AtomicU32,
    session_invalidated: AtomicBool,
    method_failures: RwLock<HashMap<String, MethodFailure>>,
    method_counts: RwLock<HashMap<String, u32>>,
    sse_connects: AtomicU32,
}

/// Open an SSE stream: endpoint event first, then queued responses.
async fn handle_sse(
    State(state): State<Arc<MockState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    if let Some(delay) = state.connect_delay {
        tokio::time::sleep(delay).await;
    }

    let session_id = format!(
        "sess-{}",
        state.session_counter.fetch_add(1, Ordering::SeqCst)
    );
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *state.session.write().await = Some(Session {
        id: session_id.clone(),
        tx,
    });
    state.session_invalidated.store(false, Ordering::SeqCst);
    state.sse_connects.fetch_add(1, Ordering::SeqCst);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?sessionId={session_id}"));
    let stream = futures::stream::once(async move { Ok::<Event, Infallible>(endpoint) }).chain(
        UnboundedReceiverStream::new(rx)
            .map(|payload| Ok::<Event, Infallible>(Event::default().event("message").data(payload))),
    );
    Sse::new(stream)
}

/// Accept a POSTed JSON-RPC frame and queue its response on the stream.
async fn handle_message(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(frame): Json<Value>,
) -> (StatusCode, String) {
    let session = state.session.read().await;
    let Some(session) = session.as_ref() else {
        return (StatusCode::NOT_FOUND, "Session not found".to_string());
    };
    let requested = query.get("sessionId").cloned().unwrap_or_default();
    if requested != session.id || state.session_invalidated.load(Ordering::SeqCst) {
        return (
            StatusCode::NOT_FOUND,
            format!("Session not found: {requested}"),
        );
    }

    let method = frame["method"].as_str().unwrap_or("").to_string();
    if !method.is_empty() {
        *state
            .method_counts
            .write()
            .await
            .entry(method.clone())
            .or_insert(0) += 1;
    }

    // Notifications get no response.
    let Some(id) = frame.get("id").cloned() else {
        return (StatusCode::ACCEPTED, String::new());
    };

    // Configured failure for this method?
    if let Some(failure) = state.method_failures.write().await.get_mut(&method) {
        if failure.remaining > 0 {
            failure.remaining -= 1;
            let reply = error_reply(&id, -32000, &failure.message);
            let _ = session.tx.send(reply.to_string());
            return (StatusCode::ACCEPTED, String::new());
        }
    }

    let reply = match method.as_str() {
        "initialize" => result_reply(
            &id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": state.capabilities,
                "serverInfo": { "name": "mock-upstream", "version": "1.0.0" },
            }),
        ),
        "ping" => result_reply(&id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = state
                .tools
                .keys()
                .map(|name| {
                    json!({
                        "name": name,
                        "description": "mock tool",
                        "inputSchema": { "type": "object" },
                    })
                })
                .collect();
            result_reply(&id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let name = frame["params"]["name"].as_str().unwrap_or("");
            match state.tools.get(name) {
                Some(result) => result_reply(&id, result.clone()),
                None => error_reply(&id, -32602, &format!("Unknown tool: {name}")),
            }
        }
        other => error_reply(&id, -32601, &format!("Method not found: {other}")),
    };

    let _ = session.tx.send(reply.to_string());
    (StatusCode::ACCEPTED, String::new())
}

fn result_reply(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_reply(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
