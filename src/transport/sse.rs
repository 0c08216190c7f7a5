//! Upstream SSE transport session.
//!
//! One `SseSession` per physical connection to the SSE MCP server. The
//! session is established in two steps: a `GET {base}/sse` stream that must
//! deliver an `endpoint` event naming the POST target (which carries the
//! session identifier), then a background read loop that routes `message`
//! events — responses back to their waiting callers by request id,
//! notifications into the forwarder channel.
//!
//! Sessions are disposable: the connection manager recreates them on every
//! reconnect while the logical client handle above stays stable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RelayError, is_session_invalid_message};
use crate::transport::jsonrpc::{
    JsonRpcId, JsonRpcMessageKind, JsonRpcResponse, classify_jsonrpc, notification_frame,
    request_frame,
};

/// SSE event type announcing the POST endpoint for this session.
const ENDPOINT_EVENT: &str = "endpoint";
/// SSE event type carrying a JSON-RPC payload.
const MESSAGE_EVENT: &str = "message";

/// A notification received from the upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamNotification {
    /// The notification method name.
    pub method: String,
    /// The notification params, if any.
    pub params: Option<Value>,
}

/// Requests POSTed but not yet answered over the SSE stream.
type PendingRequests = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// A live SSE session to the upstream server.
pub struct SseSession {
    http: reqwest::Client,
    endpoint_url: Url,
    request_timeout: Duration,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SseSession {
    /// Establish a new session: open the SSE stream, wait for the endpoint
    /// event, and spawn the read loop.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Handshake`] if the stream closes or fails to
    /// produce an endpoint event within `connect_timeout`, and connection or
    /// timeout errors for transport failures.
    pub async fn connect(
        http: &reqwest::Client,
        base_url: &Url,
        connect_timeout: Duration,
        request_timeout: Duration,
        notify_tx: mpsc::Sender<UpstreamNotification>,
    ) -> Result<Self, RelayError> {
        let sse_url = sse_url(base_url);

        let response = tokio::time::timeout(
            connect_timeout,
            http.get(sse_url.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| RelayError::Timeout {
            secs: connect_timeout.as_secs(),
        })?
        .map_err(|e| classify_reqwest_error(e, connect_timeout))?;

        if !response.status().is_success() {
            return Err(RelayError::Handshake {
                reason: format!("SSE endpoint returned HTTP {}", response.status()),
            });
        }

        let mut events = response.bytes_stream().eventsource();

        // The endpoint event names the POST target and must arrive within
        // the connect window.
        let endpoint_data = tokio::time::timeout(connect_timeout, async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == ENDPOINT_EVENT => return Ok(event.data),
                    Ok(event) => {
                        debug!(kind = %event.event, "ignoring SSE event before endpoint");
                    }
                    Err(e) => {
                        return Err(RelayError::Handshake {
                            reason: format!("SSE stream error before endpoint event: {e}"),
                        });
                    }
                }
            }
            Err(RelayError::Handshake {
                reason: "SSE stream closed before endpoint event".to_string(),
            })
        })
        .await
        .map_err(|_| RelayError::Handshake {
            reason: "timed out waiting for endpoint event".to_string(),
        })??;

        let endpoint_url = sse_url.join(endpoint_data.trim()).map_err(|e| {
            RelayError::Handshake {
                reason: format!("invalid endpoint '{endpoint_data}': {e}"),
            }
        })?;
        debug!(endpoint = %endpoint_url, "SSE session established");

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            events,
            pending.clone(),
            alive.clone(),
            notify_tx,
        ));

        Ok(Self {
            http: http.clone(),
            endpoint_url,
            request_timeout,
            pending,
            alive,
            reader,
        })
    }

    /// Whether the SSE stream is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response event.
    ///
    /// # Errors
    ///
    /// Returns the upstream's error object as [`RelayError::Upstream`] (or
    /// [`RelayError::SessionInvalid`] when the message marks the session as
    /// unknown), connection errors when the stream is closed, and
    /// [`RelayError::Timeout`] past the request deadline.
    pub async fn send_request(
        &self,
        id: i64,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        if !self.is_alive() {
            return Err(RelayError::connection("SSE stream is closed"));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = request_frame(&JsonRpcId::Number(id), method, params);
        if let Err(e) = self.post(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => match response.error {
                Some(err) if is_session_invalid_message(&err.message) => {
                    Err(RelayError::SessionInvalid {
                        message: err.message,
                    })
                }
                Some(err) => Err(RelayError::Upstream {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(RelayError::connection(
                "SSE stream closed while awaiting response",
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RelayError::Timeout {
                    secs: self.request_timeout.as_secs(),
                })
            }
        }
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns connection/session errors from the POST; there is no
    /// response to wait for.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> Result<(), RelayError> {
        if !self.is_alive() {
            return Err(RelayError::connection("SSE stream is closed"));
        }
        self.post(&notification_frame(method, params)).await
    }

    /// POST a frame to the session endpoint.
    async fn post(&self, frame: &Value) -> Result<(), RelayError> {
        let response = self
            .http
            .post(self.endpoint_url.clone())
            .json(frame)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, self.request_timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_session_invalid_message(&body) {
            return Err(RelayError::SessionInvalid { message: body });
        }
        Err(RelayError::Upstream {
            code: -32002,
            message: format!("HTTP {status}: {body}"),
        })
    }

    /// Tear down the session: stop the read loop and fail all waiters.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.pending.lock().await.clear();
    }
}

impl Drop for SseSession {
    fn drop(&mut self) {
        // A session discarded without close() (handshake failure mid-connect)
        // must not leave its read loop holding the stream open.
        self.reader.abort();
    }
}

/// Route incoming SSE events until the stream ends.
///
/// Responses are matched to pending requests by id; notifications go to the
/// forwarder channel. On stream end, all waiters are failed by dropping
/// their senders.
async fn read_loop<S>(
    mut events: S,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    notify_tx: mpsc::Sender<UpstreamNotification>,
) where
    S: futures::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>>
        + Unpin,
{
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "SSE stream error");
                break;
            }
        };
        if event.event != MESSAGE_EVENT {
            debug!(kind = %event.event, "ignoring unknown SSE event");
            continue;
        }

        let value: Value = match serde_json::from_str(&event.data) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "discarding unparseable SSE message");
                continue;
            }
        };

        match classify_jsonrpc(&value) {
            Ok(JsonRpcMessageKind::Response { id }) => {
                let response: JsonRpcResponse = match serde_json::from_value(value) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "discarding malformed response");
                        continue;
                    }
                };
                let waiter = match id {
                    JsonRpcId::Number(n) => pending.lock().await.remove(&n),
                    _ => None,
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = ?response.id, "response without a pending request"),
                }
            }
            Ok(JsonRpcMessageKind::Notification { method }) => {
                let params = value.get("params").cloned();
                if notify_tx
                    .send(UpstreamNotification { method, params })
                    .await
                    .is_err()
                {
                    debug!("notification receiver dropped");
                }
            }
            Ok(JsonRpcMessageKind::Request { id, method }) => {
                // Server-initiated requests are not bridged over this path.
                debug!(?id, method, "ignoring server-initiated request");
            }
            Err(e) => {
                warn!(error = %e, "discarding unclassifiable SSE message");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Fail every in-flight request: dropping the senders wakes the waiters
    // with a closed-channel error.
    pending.lock().await.clear();
    debug!("SSE read loop terminated");
}

/// Resolve the SSE stream URL from the configured base URL.
fn sse_url(base: &Url) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("sse");
    }
    url
}

/// Classify a reqwest failure into the relay taxonomy.
fn classify_reqwest_error(error: reqwest::Error, deadline: Duration) -> RelayError {
    if error.is_timeout() {
        RelayError::Timeout {
            secs: deadline.as_secs(),
        }
    } else if error.is_connect() {
        RelayError::connection(error.to_string())
    } else {
        RelayError::Upstream {
            code: -32002,
            message: error.to_string(),
        }
    }
}
