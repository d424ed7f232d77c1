//! Lazy, finite event sequence for one task.

use tokio::sync::oneshot;
use tokio_stream::Stream;
use tracing::debug;

use taskmux_core::classify::is_terminal_for_sequence;
use taskmux_core::{RawEvent, TaskId};

use super::channel::Take;
use super::multiplexer::TaskMultiplexer;

/// Ordered events of a single task, ending after the first terminal event.
///
/// A sequence is not restartable. It releases its channel when it yields a
/// terminal event, when the channel is closed underneath it, or when it is
/// dropped early; whichever happens first.
pub struct TaskSequence {
    task_id: TaskId,
    consumer: u64,
    mux: TaskMultiplexer,
    /// Outstanding take that survives a cancelled `next()` future.
    pending: Option<oneshot::Receiver<RawEvent>>,
    finished: bool,
}

impl TaskSequence {
    pub(crate) fn new(task_id: TaskId, consumer: u64, mux: TaskMultiplexer) -> Self {
        Self {
            task_id,
            consumer,
            mux,
            pending: None,
            finished: false,
        }
    }

    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// No further events will be yielded.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the task's next event.
    ///
    /// Returns `None` once the sequence has ended. Cancel-safe: dropping the
    /// returned future keeps the outstanding take for the next call.
    pub async fn next(&mut self) -> Option<RawEvent> {
        if self.finished {
            return None;
        }

        if self.pending.is_none() {
            match self.mux.take(&self.task_id, self.consumer) {
                Some(Take::Ready(event)) => return Some(self.yield_event(event)),
                Some(Take::Pending(rx)) => self.pending = Some(rx),
                None => {
                    self.finish();
                    return None;
                }
            }
        }

        let received = match self.pending.as_mut() {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        self.pending = None;

        if let Some(event) = received {
            Some(self.yield_event(event))
        } else {
            // Channel closed while waiting.
            self.finish();
            None
        }
    }

    /// Adapt into a [`Stream`] for transports that forward events.
    pub fn into_stream(self) -> impl Stream<Item = RawEvent> + Send + 'static {
        let mut sequence = self;
        async_stream::stream! {
            while let Some(event) = sequence.next().await {
                yield event;
            }
        }
    }

    fn yield_event(&mut self, event: RawEvent) -> RawEvent {
        if is_terminal_for_sequence(&event) {
            debug!(task_id = %self.task_id, kind = event.kind(), "Terminal event reached");
            self.finish();
        }
        event
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.pending = None;
        self.mux.release(&self.task_id, self.consumer);
    }
}

impl Drop for TaskSequence {
    fn drop(&mut self) {
        if !self.finished {
            debug!(task_id = %self.task_id, "Task sequence abandoned");
        }
        self.finish();
    }
}

impl std::fmt::Debug for TaskSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSequence")
            .field("task_id", &self.task_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use tokio_stream::StreamExt;

    use super::*;
    use crate::mux::RouteOutcome;
    use taskmux_core::events::{AgentMessage, AskKind, SayKind};

    fn say(task: &str, ts: u64, say: SayKind, body: &str) -> RawEvent {
        RawEvent::Message {
            task_id: task.into(),
            message: AgentMessage::say(ts, say, body),
        }
    }

    #[tokio::test]
    async fn yields_buffered_then_live_events_in_order() {
        let mux = TaskMultiplexer::with_defaults();
        mux.route(say("a", 1, SayKind::Text, "one"));
        mux.route(say("a", 2, SayKind::Text, "two"));

        let mut seq = mux.open_sequence(&"a".into()).unwrap();
        assert_eq!(seq.next().await.unwrap(), say("a", 1, SayKind::Text, "one"));
        assert_eq!(seq.next().await.unwrap(), say("a", 2, SayKind::Text, "two"));

        let producer = mux.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.route(say("a", 3, SayKind::Text, "three"));
        });
        assert_eq!(
            seq.next().await.unwrap(),
            say("a", 3, SayKind::Text, "three")
        );
    }

    #[tokio::test]
    async fn ends_after_completion_result() {
        let mux = TaskMultiplexer::with_defaults();
        mux.route(say("a", 1, SayKind::CompletionResult, "done"));
        mux.route(say("a", 2, SayKind::Text, "after"));

        let mut seq = mux.open_sequence(&"a".into()).unwrap();
        let last = seq.next().await.unwrap();
        assert_eq!(last, say("a", 1, SayKind::CompletionResult, "done"));
        assert!(seq.is_finished());
        assert!(seq.next().await.is_none());
        assert!(!mux.has_channel(&"a".into()));
    }

    #[tokio::test]
    async fn ends_after_followup_question() {
        let mux = TaskMultiplexer::with_defaults();
        mux.route(RawEvent::Message {
            task_id: "a".into(),
            message: AgentMessage::ask(1, AskKind::Followup, "Which file?"),
        });
        let mut seq = mux.open_sequence(&"a".into()).unwrap();
        assert!(seq.next().await.is_some());
        assert!(seq.next().await.is_none());
    }

    #[tokio::test]
    async fn task_completed_does_not_end_the_sequence() {
        let mux = TaskMultiplexer::with_defaults();
        mux.route(RawEvent::TaskCompleted {
            task_id: "a".into(),
            token_usage: Default::default(),
            tool_usage: Default::default(),
        });
        mux.route(say("a", 2, SayKind::CompletionResult, "answer"));

        let seq = mux.open_sequence(&"a".into()).unwrap();
        let events: Vec<RawEvent> = seq.into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], say("a", 2, SayKind::CompletionResult, "answer"));
    }

    #[tokio::test]
    async fn abandoning_tears_down_the_channel() {
        let mux = TaskMultiplexer::with_defaults();
        let task: TaskId = "a".into();
        mux.route(say("a", 1, SayKind::Text, "first"));
        mux.route(say("a", 2, SayKind::Text, "second"));

        let mut seq = mux.open_sequence(&task).unwrap();
        assert!(seq.next().await.is_some());
        drop(seq);

        assert!(!mux.has_channel(&task));
        assert_eq!(mux.stats().buffered_events, 0);
        assert_eq!(
            mux.route(say("a", 3, SayKind::Text, "late")),
            RouteOutcome::Discarded
        );
        assert_eq!(mux.stats().channel_count, 0);
    }

    #[tokio::test]
    async fn external_close_ends_a_waiting_sequence() {
        let mux = TaskMultiplexer::with_defaults();
        let task: TaskId = "a".into();
        let mut seq = mux.open_sequence(&task).unwrap();

        let closer = mux.clone();
        let closing_task = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close_sequence(&closing_task);
        });

        let next = tokio::time::timeout(Duration::from_secs(1), seq.next())
            .await
            .expect("close should wake the sequence");
        assert!(next.is_none());
        assert!(seq.is_finished());
    }

    #[tokio::test]
    async fn stale_sequence_does_not_close_its_successor() {
        let mux = TaskMultiplexer::with_defaults();
        let task: TaskId = "a".into();
        let stale = mux.open_sequence(&task).unwrap();
        mux.close_sequence(&task);

        let mut fresh = mux.open_sequence(&task).unwrap();
        drop(stale);

        assert!(mux.has_channel(&task));
        mux.route(say("a", 1, SayKind::Text, "still here"));
        assert!(fresh.next().await.is_some());
    }

    #[tokio::test]
    async fn cancelled_next_keeps_the_pending_take() {
        let mux = TaskMultiplexer::with_defaults();
        let mut seq = mux.open_sequence(&"a".into()).unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), seq.next()).await;
        assert!(timed_out.is_err());

        assert_eq!(
            mux.route(say("a", 1, SayKind::Text, "arrives late")),
            RouteOutcome::Delivered
        );
        assert_eq!(
            seq.next().await.unwrap(),
            say("a", 1, SayKind::Text, "arrives late")
        );
    }

    #[tokio::test]
    async fn abort_is_terminal() {
        let mux = TaskMultiplexer::with_defaults();
        mux.route(RawEvent::TaskToolFailed {
            task_id: "a".into(),
            tool: "read_file".into(),
            error: "permission denied".into(),
        });
        mux.route(RawEvent::TaskAborted { task_id: "a".into() });

        let seq = mux.open_sequence(&"a".into()).unwrap();
        let kinds: Vec<&'static str> = seq.into_stream().map(|e| e.kind()).collect().await;
        assert_eq!(kinds, vec!["task_tool_failed", "task_aborted"]);
    }
}
