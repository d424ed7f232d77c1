//! taskmux Daemon Library
//!
//! Async machinery on top of `taskmux-core`:
//! - Host agent runtime seam and a scripted replay runtime
//! - Per-task event multiplexing with terminating task sequences
//! - Transport-facing task hub
//! - Bounded-concurrency orchestration with live aggregate reports

pub mod hub;
pub mod mux;
pub mod orchestration;
pub mod runtime;
