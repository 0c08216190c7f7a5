//! Upstream endpoint configuration.
//!
//! One `UpstreamConfig` per connection manager, created once at startup and
//! never mutated. Timeouts and retry tuning are fields rather than constants
//! so tests can run the full reconnect machinery on millisecond scales.

use std::time::Duration;

/// Default SSE server URL when `--sse-url` is absent or malformed.
pub const DEFAULT_SSE_URL: &str = "http://localhost:9876";

/// Configuration for the upstream SSE connection.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the SSE MCP server (e.g., "http://localhost:9876").
    pub base_url: String,
    /// Client name presented during the protocol handshake.
    pub client_name: String,
    /// Client version presented during the protocol handshake.
    pub client_version: String,
    /// Connection timeout (TCP handshake + wait for the endpoint event).
    pub connect_timeout: Duration,
    /// Per-request timeout (POST + wait for the matching response event).
    pub request_timeout: Duration,
    /// Poll interval of the background availability monitor.
    pub monitor_interval: Duration,
    /// Backoff unit for reconnection: attempt N waits N × this duration.
    pub backoff_unit: Duration,
    /// Maximum attempts per reconnect-with-retries cycle.
    pub max_reconnect_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SSE_URL.to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(3),
            backoff_unit: Duration::from_secs(1),
            max_reconnect_attempts: 3,
        }
    }
}

impl UpstreamConfig {
    /// Create a config with the given base URL and default values for
    /// everything else.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpstreamConfig::default();
        assert_eq!(config.base_url, DEFAULT_SSE_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.monitor_interval, Duration::from_secs(3));
        assert_eq!(config.backoff_unit, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_attempts, 3);
    }

    #[test]
    fn test_config_with_base_url() {
        let config = UpstreamConfig::with_base_url("http://127.0.0.1:9000");
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
