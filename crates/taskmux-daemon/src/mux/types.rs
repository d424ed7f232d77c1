//! Task multiplexer types.

use taskmux_core::TaskId;

/// What routing did with one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed directly to a waiting consumer.
    Delivered,
    /// Appended to the task's buffer.
    Buffered,
    /// Buffered after evicting the oldest unconsumed event.
    BufferedWithEviction,
    /// Filtered as noise.
    Noise,
    /// Redelivery of the previous completed message.
    Duplicate,
    /// The task's consumer already went away.
    Discarded,
    /// Arrived after the task's terminal event; never yielded.
    AfterTerminal,
}

/// Multiplexer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Number of live per-task channels.
    pub channel_count: usize,
    /// Events buffered across all channels.
    pub buffered_events: usize,
    /// Channels with an attached sequence.
    pub open_sequences: usize,
    /// Recently closed task ids still being discarded.
    pub tombstones: usize,
}

/// Multiplexer errors.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("A sequence is already open for task {task_id}")]
    SequenceAlreadyOpen { task_id: TaskId },

    #[error("Event source already attached")]
    AlreadyAttached,
}
