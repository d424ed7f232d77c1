//! Shared tracing/logging initialization.
//!
//! The `taskmuxd` binary and any transport embedding the daemon library
//! install the same subscriber: an env-filter plus human-readable or JSON
//! lines, always written to stderr so stdout stays free for command output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter from `RUST_LOG`, falling back to `default_filter`
/// (e.g. `"taskmux_daemon=info"`) when the variable is unset or invalid.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global tracing subscriber.
///
/// * `log_json` -- emit structured JSON log lines instead of the
///   human-readable format.
///
/// Returns `false` when a global subscriber was already installed (an
/// embedding host got there first); the existing one is kept.
pub fn init_tracing(default_filter: &str, log_json: bool) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    let installed = if log_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.is_ok()
}
