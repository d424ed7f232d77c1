//! `taskmux` Core Library
//!
//! Shared functionality for `taskmux` components:
//! - Raw agent event model and NDJSON wire parsing
//! - Event classification (noise, terminal, duplicate detection)
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{AgentMessage, RawEvent, TaskId};
