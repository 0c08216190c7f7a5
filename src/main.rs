//! Relay entry point.
//!
//! Parses the command line, initializes tracing on stderr (stdout carries
//! protocol frames), and drives the proxy until the downstream endpoint
//! closes.

use mcp_relay::config::UpstreamConfig;
use mcp_relay::{cli, server};

#[tokio::main]
async fn main() {
    init_tracing();

    let args = cli::parse_or_default(std::env::args_os());
    tracing::info!(sse_url = %args.sse_url, "starting MCP relay");

    let config = UpstreamConfig::with_base_url(&args.sse_url);
    let code = match server::run(config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "relay failed");
            eprintln!("mcp-relay: {e}");
            1
        }
    };

    std::process::exit(code);
}

/// Initialise the tracing subscriber with stderr output.
///
/// Respects `RUST_LOG`; defaults to `info` so connection transitions are
/// visible without configuration. stdout is never written to — it belongs
/// to the protocol stream.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
