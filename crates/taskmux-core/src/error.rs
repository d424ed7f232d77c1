//! Error types for `taskmux` core library.

use thiserror::Error;

/// Result type alias using `taskmux` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `taskmux` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Raw event parsing error
    #[error("Failed to parse event: {0}")]
    EventParse(String),

    /// Event type tag not known to this build
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
