//! Replay runtime driven by a prepared event script.
//!
//! Each scripted task's events are split into segments at every follow-up
//! question. `start_task` claims the next unstarted task and emits its first
//! segment; `send_message` and `resume_task` emit the following one.

use std::collections::{HashMap, VecDeque};
use std::io::BufRead;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use taskmux_core::events::{AskKind, parse_line};
use taskmux_core::{Error, RawEvent, TaskId};

use super::{AgentRuntime, RuntimeError};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// [`AgentRuntime`] that replays scripted events instead of running an agent.
pub struct ScriptedRuntime {
    events_tx: broadcast::Sender<RawEvent>,
    event_delay: Duration,
    failures: HashMap<String, String>,
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    /// Tasks not yet claimed by `start_task`, in first-appearance order.
    unstarted: VecDeque<TaskId>,
    /// Remaining segments per task.
    segments: HashMap<TaskId, VecDeque<Vec<RawEvent>>>,
    started: Vec<(String, TaskId)>,
}

/// Builder for [`ScriptedRuntime`].
#[derive(Default)]
pub struct ScriptedRuntimeBuilder {
    events: Vec<RawEvent>,
    event_delay: Duration,
    event_capacity: Option<usize>,
    failures: HashMap<String, String>,
}

impl ScriptedRuntimeBuilder {
    /// Append events to the script.
    #[must_use]
    pub fn events(mut self, events: impl IntoIterator<Item = RawEvent>) -> Self {
        self.events.extend(events);
        self
    }

    /// Append events parsed from NDJSON lines.
    ///
    /// Blank lines are skipped; so are events of a type this build does not
    /// know, with a warning. Any other malformed line is an error.
    pub fn ndjson(mut self, reader: impl BufRead) -> Result<Self, Error> {
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(event) => self.events.push(event),
                Err(Error::UnknownEventType(kind)) => {
                    warn!(line = index + 1, kind = %kind, "Skipping unknown event type");
                }
                Err(e) => {
                    return Err(Error::EventParse(format!("line {}: {e}", index + 1)));
                }
            }
        }
        Ok(self)
    }

    /// Append events from an NDJSON script file.
    pub fn ndjson_file(self, path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        debug!(path = %path.display(), "Loading event script");
        self.ndjson(std::io::BufReader::new(file))
    }

    /// Pause before emitting each event.
    #[must_use]
    pub const fn event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Capacity of the global broadcast stream.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Make `start_task(query)` fail as if the runtime were unreachable.
    #[must_use]
    pub fn fail_query(mut self, query: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(query.into(), reason.into());
        self
    }

    pub fn build(self) -> ScriptedRuntime {
        let mut state = ScriptState::default();
        for event in self.events {
            let task_id = event.task_id().clone();
            let segments = state.segments.entry(task_id.clone()).or_insert_with(|| {
                state.unstarted.push_back(task_id);
                VecDeque::new()
            });
            // A follow-up question closes the current segment.
            match segments.back_mut() {
                Some(current) if !current.last().is_some_and(is_followup_question) => {
                    current.push(event);
                }
                _ => segments.push_back(vec![event]),
            }
        }

        info!(tasks = state.unstarted.len(), "Scripted runtime ready");

        let (events_tx, _) =
            broadcast::channel(self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY).max(1));
        ScriptedRuntime {
            events_tx,
            event_delay: self.event_delay,
            failures: self.failures,
            state: Mutex::new(state),
        }
    }
}

fn is_followup_question(event: &RawEvent) -> bool {
    event
        .message()
        .is_some_and(|m| !m.partial && m.ask_kind() == Some(&AskKind::Followup))
}

impl ScriptedRuntime {
    pub fn builder() -> ScriptedRuntimeBuilder {
        ScriptedRuntimeBuilder::default()
    }

    /// Runtime replaying `events` with no delay.
    pub fn from_events(events: impl IntoIterator<Item = RawEvent>) -> Self {
        Self::builder().events(events).build()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queries passed to successful `start_task` calls, with their ids.
    pub fn started(&self) -> Vec<(String, TaskId)> {
        self.lock().started.clone()
    }

    /// Scripted tasks not yet claimed.
    pub fn remaining_tasks(&self) -> usize {
        self.lock().unstarted.len()
    }

    fn next_segment(&self, task_id: &TaskId) -> Result<Option<Vec<RawEvent>>, RuntimeError> {
        let mut state = self.lock();
        let segments =
            state
                .segments
                .get_mut(task_id)
                .ok_or_else(|| RuntimeError::TaskNotFound {
                    task_id: task_id.clone(),
                })?;
        Ok(segments.pop_front())
    }

    fn emit(&self, task_id: &TaskId, events: Vec<RawEvent>) {
        let tx = self.events_tx.clone();
        let delay = self.event_delay;
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let count = events.len();
            for event in events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                // No subscriber is not an error for a broadcast source.
                let _ = tx.send(event);
            }
            debug!(%task_id, count, "Script segment emitted");
        });
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn start_task(&self, query: &str) -> Result<TaskId, RuntimeError> {
        if let Some(reason) = self.failures.get(query) {
            warn!(query, reason = %reason, "Scripted start failure");
            return Err(RuntimeError::Unavailable(reason.clone()));
        }

        let (task_id, segment) = {
            let mut state = self.lock();
            let task_id = state
                .unstarted
                .pop_front()
                .ok_or_else(|| RuntimeError::Rejected("no scripted task left".into()))?;
            let segment = state
                .segments
                .get_mut(&task_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_default();
            state.started.push((query.to_string(), task_id.clone()));
            (task_id, segment)
        };

        info!(%task_id, query, events = segment.len(), "Scripted task started");
        self.emit(&task_id, segment);
        Ok(task_id)
    }

    async fn send_message(&self, task_id: &TaskId, text: &str) -> Result<(), RuntimeError> {
        let segment = self.next_segment(task_id)?;
        debug!(%task_id, text_len = text.len(), "Scripted message received");
        if let Some(segment) = segment {
            self.emit(task_id, segment);
        }
        Ok(())
    }

    async fn resume_task(&self, task_id: &TaskId) -> Result<(), RuntimeError> {
        if let Some(segment) = self.next_segment(task_id)? {
            self.emit(task_id, segment);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmux_core::events::{AgentMessage, SayKind};

    fn say(task: &str, ts: u64, kind: SayKind, text: &str) -> RawEvent {
        RawEvent::Message {
            task_id: task.into(),
            message: AgentMessage::say(ts, kind, text),
        }
    }

    fn followup(task: &str, ts: u64, text: &str) -> RawEvent {
        RawEvent::Message {
            task_id: task.into(),
            message: AgentMessage::ask(ts, AskKind::Followup, text),
        }
    }

    async fn drain(rx: &mut broadcast::Receiver<RawEvent>, n: usize) -> Vec<RawEvent> {
        let mut out = Vec::new();
        for _ in 0..n {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("scripted event")
                .unwrap();
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn start_task_claims_tasks_in_first_appearance_order() {
        let runtime = ScriptedRuntime::from_events([
            say("t2", 1, SayKind::Text, "two"),
            say("t1", 2, SayKind::Text, "one"),
        ]);
        assert_eq!(runtime.start_task("A").await.unwrap(), TaskId::from("t2"));
        assert_eq!(runtime.start_task("B").await.unwrap(), TaskId::from("t1"));
        assert!(matches!(
            runtime.start_task("C").await,
            Err(RuntimeError::Rejected(_))
        ));
        assert_eq!(runtime.started().len(), 2);
    }

    #[tokio::test]
    async fn start_emits_only_the_first_segment() {
        let runtime = ScriptedRuntime::from_events([
            say("t1", 1, SayKind::Text, "thinking"),
            followup("t1", 2, "Which file?"),
            say("t1", 3, SayKind::CompletionResult, "done"),
        ]);
        let mut rx = runtime.subscribe();
        let task = runtime.start_task("q").await.unwrap();

        let first = drain(&mut rx, 2).await;
        assert_eq!(first[1], followup("t1", 2, "Which file?"));

        runtime.send_message(&task, "main.rs").await.unwrap();
        let second = drain(&mut rx, 1).await;
        assert_eq!(second[0], say("t1", 3, SayKind::CompletionResult, "done"));
    }

    #[tokio::test]
    async fn configured_failure_is_reported_as_unavailable() {
        let runtime = ScriptedRuntime::builder()
            .events([say("t1", 1, SayKind::Text, "x")])
            .fail_query("broken", "runtime offline")
            .build();
        let err = runtime.start_task("broken").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(ref r) if r == "runtime offline"));
        assert_eq!(runtime.remaining_tasks(), 1);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let runtime = ScriptedRuntime::from_events([]);
        assert!(matches!(
            runtime.resume_task(&"missing".into()).await,
            Err(RuntimeError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn ndjson_skips_unknown_types_and_blank_lines() {
        let script = concat!(
            r#"{"type":"message","task_id":"t1","message":{"ts":1,"type":"say","say":"text","text":"hi"}}"#,
            "\n\n",
            r#"{"type":"task_teleported","task_id":"t1"}"#,
            "\n",
            r#"{"type":"task_aborted","task_id":"t1"}"#,
            "\n",
        );
        let runtime = ScriptedRuntime::builder()
            .ndjson(script.as_bytes())
            .unwrap()
            .build();
        assert_eq!(runtime.remaining_tasks(), 1);
    }

    #[test]
    fn ndjson_rejects_malformed_lines() {
        let result = ScriptedRuntime::builder().ndjson("{not json}\n".as_bytes());
        assert!(matches!(result, Err(Error::EventParse(_))));
    }

    #[test]
    fn ndjson_file_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.ndjson");
        std::fs::write(&path, "{\"type\":\"task_started\",\"task_id\":\"t9\"}\n").unwrap();
        let runtime = ScriptedRuntime::builder()
            .ndjson_file(&path)
            .unwrap()
            .build();
        assert_eq!(runtime.remaining_tasks(), 1);
    }
}
