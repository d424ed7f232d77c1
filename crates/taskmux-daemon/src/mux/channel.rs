//! Single-producer/single-consumer ordered buffer for one task.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use taskmux_core::RawEvent;
use taskmux_core::classify::is_terminal_for_sequence;

/// Result of a `take` on a channel.
pub(crate) enum Take {
    /// The oldest buffered event.
    Ready(RawEvent),
    /// Nothing buffered; resolved by the next `push`.
    Pending(oneshot::Receiver<RawEvent>),
}

/// Result of a `push` on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Delivered,
    Buffered,
    Evicted,
    /// Arrived after the sequence's terminal event and was dropped.
    AfterTerminal,
}

/// Ordered per-task buffer with at most one waiting consumer.
///
/// Invariant: `buffer` and `waiter` are never both non-empty. An arriving
/// event goes straight to a live waiter, otherwise to the back of the buffer.
///
/// Once a terminal event is accepted the channel is sealed: later events are
/// dropped, so a full buffer never evicts the event that ends the sequence.
pub(crate) struct TaskChannel {
    buffer: VecDeque<RawEvent>,
    waiter: Option<oneshot::Sender<RawEvent>>,
    capacity: usize,
    sealed: bool,
    /// Token of the `TaskSequence` currently reading this channel.
    pub consumer: Option<u64>,
    /// Last routed event when it was a completed message, for dedup.
    pub last_completed: Option<RawEvent>,
}

impl TaskChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            waiter: None,
            capacity: capacity.max(1),
            sealed: false,
            consumer: None,
            last_completed: None,
        }
    }

    /// Hand `event` to the waiting consumer, or buffer it. Never blocks.
    pub fn push(&mut self, event: RawEvent) -> Push {
        if self.sealed {
            return Push::AfterTerminal;
        }
        self.sealed = is_terminal_for_sequence(&event);

        // A waiter whose receiver is gone (cancelled take) counts as absent.
        let event = match self.waiter.take() {
            Some(waiter) => match waiter.send(event) {
                Ok(()) => return Push::Delivered,
                Err(event) => event,
            },
            None => event,
        };

        let evicted = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            true
        } else {
            false
        };
        self.buffer.push_back(event);

        if evicted { Push::Evicted } else { Push::Buffered }
    }

    /// Accept events again after a sealed terminal event.
    ///
    /// Used when the task is continued past a follow-up question.
    pub fn unseal(&mut self) {
        self.sealed = false;
    }

    /// Pop the oldest event, or register as the waiting consumer.
    ///
    /// Only one outstanding take per channel is supported; a new pending take
    /// replaces the previous waiter.
    pub fn take(&mut self) -> Take {
        if let Some(event) = self.buffer.pop_front() {
            return Take::Ready(event);
        }
        let (tx, rx) = oneshot::channel();
        self.waiter = Some(tx);
        Take::Pending(rx)
    }

    /// Discard buffered events and cancel the waiter. Idempotent.
    ///
    /// Returns the number of discarded events.
    pub fn close(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.waiter = None;
        self.last_completed = None;
        self.sealed = false;
        discarded
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
