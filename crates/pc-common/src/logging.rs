//! Structured Logging Configuration
//!
//! Provides configurable logging with:
//! - JSON output for log collection (LOG_FORMAT=json)
//! - Human-readable output on stderr (default)
//!
//! # Usage
//!
//! ```rust,ignore
//! use pc_common::logging::init_logging;
//!
//! fn main() {
//!     init_logging("warn");
//!
//!     tracing::info!(account = %name, "Logged in");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Set to "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: Standard log level filter, overrides the default level
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=pc_auth=trace,reqwest=info`
//!
//! Everything goes to stderr so command output on stdout stays machine-readable.

use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the given default level.
///
/// Reads LOG_FORMAT env var to determine output format:
/// - "json" -> JSON output
/// - anything else -> human-readable text
///
/// Reads RUST_LOG env var for log level filtering (falls back to `default_level`).
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(default_level: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();

    let env_filter = build_filter(default_level);

    if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter);
    } else {
        init_text_logging(env_filter);
    }
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn init_json_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true),
        )
        .try_init();
}

fn init_text_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        let filter = build_filter("warn");
        drop(filter);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging("debug");
        init_logging("debug");
    }
}
