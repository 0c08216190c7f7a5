//! CLI argument types.
//!
//! Defined separately from `main.rs` so integration tests can exercise
//! parsing directly. The surface is one optional flag: absent, unknown, or
//! malformed arguments fall back to the default URL instead of aborting —
//! the relay's stdio side should come up even when launched with a mangled
//! command line.

use std::ffi::OsString;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::warn;

use crate::config::DEFAULT_SSE_URL;

/// Arguments for the relay binary.
#[derive(Parser, Debug)]
#[command(name = "mcp-relay", version, about = "Resilient stdio-to-SSE bridge for MCP servers")]
pub struct RelayArgs {
    /// URL of the SSE MCP server.
    #[arg(long, default_value = DEFAULT_SSE_URL)]
    pub sse_url: String,
}

/// Parse arguments, falling back to the default URL when they are
/// malformed.
///
/// Help and version requests still exit as usual. A URL that does not parse
/// is replaced by the default as well, so a typo degrades to the common
/// local setup rather than a dead process.
pub fn parse_or_default<I, T>(args: I) -> RelayArgs
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let parsed = match RelayArgs::try_parse_from(args) {
        Ok(args) => args,
        Err(e)
            if e.kind() == ErrorKind::DisplayHelp || e.kind() == ErrorKind::DisplayVersion =>
        {
            e.exit()
        }
        Err(e) => {
            warn!(error = %e.kind(), sse_url = DEFAULT_SSE_URL, "malformed arguments, using default URL");
            return RelayArgs {
                sse_url: DEFAULT_SSE_URL.to_string(),
            };
        }
    };

    if reqwest::Url::parse(&parsed.sse_url).is_err() {
        warn!(
            sse_url = %parsed.sse_url,
            fallback = DEFAULT_SSE_URL,
            "unparseable SSE URL, using default"
        );
        return RelayArgs {
            sse_url: DEFAULT_SSE_URL.to_string(),
        };
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_absent() {
        let args = parse_or_default(["mcp-relay"]);
        assert_eq!(args.sse_url, DEFAULT_SSE_URL);
    }

    #[test]
    fn test_explicit_url() {
        let args = parse_or_default(["mcp-relay", "--sse-url", "http://127.0.0.1:8000"]);
        assert_eq!(args.sse_url, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_unknown_flag_falls_back() {
        let args = parse_or_default(["mcp-relay", "--bogus", "value"]);
        assert_eq!(args.sse_url, DEFAULT_SSE_URL);
    }

    #[test]
    fn test_missing_value_falls_back() {
        let args = parse_or_default(["mcp-relay", "--sse-url"]);
        assert_eq!(args.sse_url, DEFAULT_SSE_URL);
    }

    #[test]
    fn test_malformed_url_falls_back() {
        let args = parse_or_default(["mcp-relay", "--sse-url", "not a url"]);
        assert_eq!(args.sse_url, DEFAULT_SSE_URL);
    }
}
