//! Task multiplexer: one global event subscription, many per-task channels.
//!
//! Every raw event is classified, filtered and routed into the channel of the
//! task it belongs to. Channels are created lazily the first time an event or
//! a consumer references a task, and torn down when that task's sequence ends
//! or its consumer disconnects.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use taskmux_core::classify::{are_duplicate_completed_messages, is_noise};
use taskmux_core::config::MultiplexerConfig;
use taskmux_core::{RawEvent, TaskId};

use super::channel::{Push, Take, TaskChannel};
use super::sequence::TaskSequence;
use super::types::{MultiplexerStats, MuxError, RouteOutcome};

/// Demultiplexes the host runtime's shared event stream into per-task
/// sequences.
///
/// Cloning is cheap; clones share the same channel map.
#[derive(Clone)]
pub struct TaskMultiplexer {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<MuxState>,
    config: MultiplexerConfig,
    attached: AtomicBool,
}

#[derive(Default)]
struct MuxState {
    channels: HashMap<TaskId, TaskChannel>,
    /// Recently closed tasks, oldest first.
    tombstone_order: VecDeque<TaskId>,
    tombstones: HashSet<TaskId>,
    /// Source of consumer tokens; each opened sequence gets a fresh one.
    next_consumer: u64,
}

impl MuxState {
    fn bury(&mut self, task_id: &TaskId, capacity: usize) {
        if capacity == 0 || !self.tombstones.insert(task_id.clone()) {
            return;
        }
        self.tombstone_order.push_back(task_id.clone());
        while self.tombstone_order.len() > capacity {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    fn unbury(&mut self, task_id: &TaskId) {
        if self.tombstones.remove(task_id) {
            self.tombstone_order.retain(|id| id != task_id);
        }
    }
}

impl TaskMultiplexer {
    /// Create a new multiplexer.
    pub fn new(config: MultiplexerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MuxState::default()),
                config,
                attached: AtomicBool::new(false),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MultiplexerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, MuxState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of the global event subscription.
    ///
    /// Spawns the pump task that routes every received event. Only one
    /// source may be attached for the lifetime of the multiplexer.
    ///
    /// If the pump falls behind the source, the skipped events are lost and
    /// may include a terminal event. Every open sequence is then closed so
    /// its consumer ends instead of waiting forever.
    pub fn attach(
        &self,
        mut events: broadcast::Receiver<RawEvent>,
    ) -> Result<JoinHandle<()>, MuxError> {
        if self.shared.attached.swap(true, Ordering::AcqRel) {
            return Err(MuxError::AlreadyAttached);
        }

        let mux = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        mux.route(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        let closed = mux.close_open_sequences();
                        warn!(skipped = n, closed, "Event pump lagged, closed open sequences");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event source closed, stopping pump");
                        break;
                    }
                }
            }
        });

        info!("Event source attached");
        Ok(handle)
    }

    /// Classify, filter and route one raw event into its task's channel.
    #[allow(clippy::significant_drop_tightening)]
    pub fn route(&self, event: RawEvent) -> RouteOutcome {
        if is_noise(&event) {
            trace!(task_id = %event.task_id(), "Dropping noise event");
            return RouteOutcome::Noise;
        }

        let task_id = event.task_id().clone();
        let kind = event.kind();
        let mut state = self.lock();

        if state.tombstones.contains(&task_id) {
            trace!(%task_id, kind, "Discarding event for closed task");
            return RouteOutcome::Discarded;
        }

        let channel = state.channels.entry(task_id.clone()).or_insert_with(|| {
            debug!(%task_id, "Created task channel");
            TaskChannel::new(self.shared.config.buffer_capacity)
        });

        if channel
            .last_completed
            .as_ref()
            .is_some_and(|prev| are_duplicate_completed_messages(prev, &event))
        {
            debug!(%task_id, "Dropping redelivered completed message");
            return RouteOutcome::Duplicate;
        }
        channel.last_completed = event
            .message()
            .filter(|m| !m.partial)
            .map(|_| event.clone());

        match channel.push(event) {
            Push::Delivered => {
                trace!(%task_id, kind, "Event delivered to waiting consumer");
                RouteOutcome::Delivered
            }
            Push::Buffered => {
                trace!(%task_id, kind, "Event buffered");
                RouteOutcome::Buffered
            }
            Push::AfterTerminal => {
                trace!(%task_id, kind, "Dropping event after terminal event");
                RouteOutcome::AfterTerminal
            }
            Push::Evicted => {
                warn!(
                    %task_id,
                    capacity = self.shared.config.buffer_capacity,
                    "Task buffer full, dropped oldest event"
                );
                RouteOutcome::BufferedWithEviction
            }
        }
    }

    /// Open the event sequence for a task.
    ///
    /// Events that arrived before the sequence was opened are yielded first.
    /// Only one live sequence per task is allowed.
    #[allow(clippy::significant_drop_tightening)]
    pub fn open_sequence(&self, task_id: &TaskId) -> Result<TaskSequence, MuxError> {
        let mut state = self.lock();
        state.unbury(task_id);

        let channel = state
            .channels
            .entry(task_id.clone())
            .or_insert_with(|| TaskChannel::new(self.shared.config.buffer_capacity));

        if channel.consumer.is_some() {
            return Err(MuxError::SequenceAlreadyOpen {
                task_id: task_id.clone(),
            });
        }
        let buffered = channel.buffered();
        state.next_consumer += 1;
        let consumer = state.next_consumer;
        if let Some(channel) = state.channels.get_mut(task_id) {
            channel.consumer = Some(consumer);
        }
        drop(state);

        info!(%task_id, buffered, "Task sequence opened");
        Ok(TaskSequence::new(task_id.clone(), consumer, self.clone()))
    }

    /// Tear down a task's channel, dropping buffered events and cancelling
    /// any waiting consumer.
    ///
    /// Later events for the task are discarded until it is revived or
    /// reopened. Returns `true` if a channel existed.
    pub fn close_sequence(&self, task_id: &TaskId) -> bool {
        let mut state = self.lock();
        let removed = state.channels.remove(task_id);
        state.bury(task_id, self.shared.config.tombstone_capacity);
        drop(state);

        match removed {
            Some(mut channel) => {
                let discarded = channel.close();
                info!(%task_id, discarded, "Task channel closed");
                true
            }
            None => false,
        }
    }

    /// Accept events for a previously closed task again.
    ///
    /// Call before asking the runtime to continue a task (answering a
    /// follow-up question, resuming from history) so its next events are
    /// buffered until a new sequence is opened.
    pub fn revive(&self, task_id: &TaskId) {
        let mut state = self.lock();
        state.unbury(task_id);
        if let Some(channel) = state.channels.get_mut(task_id) {
            channel.unseal();
        }
        drop(state);
        debug!(%task_id, "Task revived");
    }

    /// Close every channel that has a sequence attached.
    ///
    /// Returns the number of channels closed.
    pub fn close_open_sequences(&self) -> usize {
        let open: Vec<TaskId> = self
            .lock()
            .channels
            .iter()
            .filter(|(_, c)| c.consumer.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        let mut closed = 0;
        for task_id in &open {
            if self.close_sequence(task_id) {
                closed += 1;
            }
        }
        closed
    }

    /// Whether a channel currently exists for the task.
    pub fn has_channel(&self, task_id: &TaskId) -> bool {
        self.lock().channels.contains_key(task_id)
    }

    /// Get multiplexer statistics.
    pub fn stats(&self) -> MultiplexerStats {
        let state = self.lock();
        MultiplexerStats {
            channel_count: state.channels.len(),
            buffered_events: state.channels.values().map(TaskChannel::buffered).sum(),
            open_sequences: state
                .channels
                .values()
                .filter(|c| c.consumer.is_some())
                .count(),
            tombstones: state.tombstones.len(),
        }
    }

    /// Pop the next event for `task_id` or register as its waiting consumer.
    ///
    /// `None` means the channel is gone or now belongs to another sequence.
    pub(crate) fn take(&self, task_id: &TaskId, consumer: u64) -> Option<Take> {
        self.lock()
            .channels
            .get_mut(task_id)
            .filter(|c| c.consumer == Some(consumer))
            .map(TaskChannel::take)
    }

    /// Teardown path of a finished sequence.
    ///
    /// Closes the channel only while it still belongs to `consumer`, so a
    /// stale sequence never tears down one opened after it.
    pub(crate) fn release(&self, task_id: &TaskId, consumer: u64) -> bool {
        let owned = self
            .lock()
            .channels
            .get(task_id)
            .is_some_and(|c| c.consumer == Some(consumer));
        owned && self.close_sequence(task_id)
    }
}
