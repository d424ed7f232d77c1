//! Raw agent events and their NDJSON wire format.
//!
//! The host runtime emits one shared stream of lifecycle/progress events for
//! every task it runs. This module defines the closed event model and a
//! tolerant reader for the newline-delimited JSON form of that stream.

mod parser;
mod types;

pub use parser::{parse_line, parse_value};
pub use types::*;
