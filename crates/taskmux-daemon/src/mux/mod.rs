//! Per-task event multiplexing.
//!
//! The host runtime emits one shared event stream for every task it runs.
//! [`TaskMultiplexer`] owns the single subscription to that stream and
//! demultiplexes it into independent per-task channels; each consumer reads
//! its task through a [`TaskSequence`] that ends on the first terminal event
//! and tears its channel down on every exit path.

mod channel;
mod multiplexer;
mod sequence;
mod types;

pub use multiplexer::TaskMultiplexer;
pub use sequence::TaskSequence;
pub use types::{MultiplexerStats, MuxError, RouteOutcome};
