//! Shared test fixtures: the mock upstream server, recording/failing
//! downstream sinks, and fast-timing configs.

#![allow(dead_code)]

pub mod mock_upstream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use mcp_relay::config::UpstreamConfig;
use mcp_relay::connection::ConnectionManager;
use mcp_relay::error::RelayError;
use mcp_relay::transport::stdio::DownstreamSink;

/// Config with millisecond-scale timing so reconnect machinery runs fast.
pub fn fast_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: base_url.to_string(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        monitor_interval: Duration::from_millis(100),
        backoff_unit: Duration::from_millis(50),
        ..UpstreamConfig::default()
    }
}

/// Build a manager with fast timing; the notification receiver is dropped.
pub fn manager_for(base_url: &str) -> Arc<ConnectionManager> {
    let (tx, _rx) = mpsc::channel(16);
    ConnectionManager::new(fast_config(base_url), tx).expect("valid config")
}

/// A downstream sink that records every notification it receives.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<(String, Option<Value>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn notifications(&self) -> Vec<(String, Option<Value>)> {
        self.notifications.lock().await.clone()
    }

    pub async fn methods(&self) -> Vec<String> {
        self.notifications
            .lock()
            .await
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait]
impl DownstreamSink for RecordingSink {
    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), RelayError> {
        self.notifications
            .lock()
            .await
            .push((method.to_string(), params));
        Ok(())
    }
}

/// A downstream sink that rejects every notification.
pub struct FailingSink;

#[async_trait]
impl DownstreamSink for FailingSink {
    async fn send_notification(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<(), RelayError> {
        Err(RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "downstream gone",
        )))
    }
}

/// Find a free loopback port by binding and dropping a listener.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("failed to bind probe listener");
    let port = listener
        .local_addr()
        .expect("probe listener has no addr")
        .port();
    drop(listener);
    port
}
