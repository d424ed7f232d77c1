//! Task status records and the fold step that maintains them.

use std::fmt;

use serde::Serialize;

use taskmux_core::classify::is_final_answer;
use taskmux_core::events::{AskKind, SayKind};
use taskmux_core::{RawEvent, TaskId};

/// Result text recorded when the runtime aborts a task.
pub const CANCELLED_RESULT: &str = "Task was cancelled before it finished.";

/// Lifecycle state of an orchestrated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed or cancelled: no later event changes the record.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Any state a task can end in.
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator-side view of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusRecord {
    pub task_id: TaskId,
    pub source_query: String,
    pub state: TaskState,
    pub last_result: String,
}

/// What one fold step did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FoldStep {
    /// The record's state or result text changed.
    pub changed: bool,
    /// Stop folding this task.
    pub done: bool,
}

impl TaskStatusRecord {
    /// Fresh record for a task that just obtained its id.
    pub fn created(task_id: TaskId, source_query: impl Into<String>) -> Self {
        Self {
            task_id,
            source_query: source_query.into(),
            state: TaskState::Created,
            last_result: String::new(),
        }
    }

    /// Record for a query whose task never started.
    pub fn start_failed(
        task_id: TaskId,
        source_query: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            task_id,
            source_query: source_query.into(),
            state: TaskState::Failed,
            last_result: error.to_string(),
        }
    }
}

/// Apply one consumed event to `record`.
///
/// A failed record stays open: tool failures are not terminal for the task,
/// so a later completion or abort still decides the final state. Completed
/// and cancelled records never change again.
pub fn fold_event(record: &mut TaskStatusRecord, event: &RawEvent) -> FoldStep {
    if record.state.is_final() {
        return FoldStep {
            changed: false,
            done: true,
        };
    }

    let before = record.state;
    let mut replaced_text = false;
    let mut done = false;

    match event {
        RawEvent::Message { message, .. } => {
            if is_final_answer(event) {
                record.state = TaskState::Completed;
                replaced_text = set_text(&mut record.last_result, message.text_or_empty());
                done = true;
            } else if matches!(
                message.say_kind(),
                Some(SayKind::Text | SayKind::CompletionResult)
            ) || (!message.partial && message.ask_kind() == Some(&AskKind::Followup))
            {
                if record.state == TaskState::Created {
                    record.state = TaskState::Running;
                }
                if record.state == TaskState::Running {
                    replaced_text = set_text(&mut record.last_result, message.text_or_empty());
                }
            }
        }
        RawEvent::TaskCompleted { .. } => {
            record.state = TaskState::Completed;
            done = true;
        }
        RawEvent::TaskAborted { .. } => {
            record.state = TaskState::Cancelled;
            replaced_text = set_text(&mut record.last_result, CANCELLED_RESULT);
            done = true;
        }
        RawEvent::TaskToolFailed { tool, error, .. } => {
            record.state = TaskState::Failed;
            replaced_text = set_text(
                &mut record.last_result,
                &format!("Tool '{tool}' failed: {error}"),
            );
        }
        _ => {}
    }

    FoldStep {
        changed: replaced_text || before != record.state,
        done,
    }
}

fn set_text(slot: &mut String, text: &str) -> bool {
    if slot == text {
        return false;
    }
    text.clone_into(slot);
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use taskmux_core::events::AgentMessage;

    fn record() -> TaskStatusRecord {
        TaskStatusRecord::created("t1".into(), "query")
    }

    fn msg(message: AgentMessage) -> RawEvent {
        RawEvent::Message {
            task_id: "t1".into(),
            message,
        }
    }

    #[test]
    fn first_text_starts_running() {
        let mut rec = record();
        let step = fold_event(&mut rec, &msg(AgentMessage::say(1, SayKind::Text, "hi")));
        assert_eq!(step, FoldStep { changed: true, done: false });
        assert_eq!(rec.state, TaskState::Running);
        assert_eq!(rec.last_result, "hi");
    }

    #[test]
    fn partial_completion_result_keeps_running() {
        let mut rec = record();
        let partial = AgentMessage::say(1, SayKind::CompletionResult, "draft").partial();
        let step = fold_event(&mut rec, &msg(partial));
        assert!(!step.done);
        assert_eq!(rec.state, TaskState::Running);
        assert_eq!(rec.last_result, "draft");
    }

    #[test]
    fn final_answer_completes() {
        let mut rec = record();
        let step = fold_event(
            &mut rec,
            &msg(AgentMessage::say(2, SayKind::CompletionResult, "answer")),
        );
        assert_eq!(step, FoldStep { changed: true, done: true });
        assert_eq!(rec.state, TaskState::Completed);
        assert_eq!(rec.last_result, "answer");
    }

    #[test]
    fn unrelated_events_change_nothing() {
        let mut rec = record();
        let step = fold_event(
            &mut rec,
            &msg(AgentMessage::say(1, SayKind::Reasoning, "hmm")),
        );
        assert_eq!(step, FoldStep::default());
        let step = fold_event(&mut rec, &RawEvent::TaskStarted { task_id: "t1".into() });
        assert_eq!(step, FoldStep::default());
        assert_eq!(rec.state, TaskState::Created);
    }

    #[test]
    fn tool_failure_is_recorded_and_fold_continues() {
        let mut rec = record();
        let step = fold_event(
            &mut rec,
            &RawEvent::TaskToolFailed {
                task_id: "t1".into(),
                tool: "read_file".into(),
                error: "permission denied".into(),
            },
        );
        assert_eq!(step, FoldStep { changed: true, done: false });
        assert_eq!(rec.state, TaskState::Failed);
        assert!(rec.last_result.contains("read_file"));
        assert!(rec.last_result.contains("permission denied"));

        // Progress text does not hide the failure.
        let step = fold_event(&mut rec, &msg(AgentMessage::say(3, SayKind::Text, "retrying")));
        assert!(!step.changed);
        assert_eq!(rec.state, TaskState::Failed);
    }

    #[test]
    fn abort_overrides_tool_failure() {
        let mut rec = record();
        fold_event(
            &mut rec,
            &RawEvent::TaskToolFailed {
                task_id: "t1".into(),
                tool: "read_file".into(),
                error: "permission denied".into(),
            },
        );
        let step = fold_event(&mut rec, &RawEvent::TaskAborted { task_id: "t1".into() });
        assert_eq!(step, FoldStep { changed: true, done: true });
        assert_eq!(rec.state, TaskState::Cancelled);
        assert_eq!(rec.last_result, CANCELLED_RESULT);
    }

    #[test]
    fn task_completed_keeps_last_result() {
        let mut rec = record();
        fold_event(&mut rec, &msg(AgentMessage::say(1, SayKind::Text, "working")));
        let step = fold_event(
            &mut rec,
            &RawEvent::TaskCompleted {
                task_id: "t1".into(),
                token_usage: Default::default(),
                tool_usage: Default::default(),
            },
        );
        assert!(step.done);
        assert_eq!(rec.state, TaskState::Completed);
        assert_eq!(rec.last_result, "working");
    }

    #[test]
    fn settled_records_are_immutable() {
        let mut rec = record();
        fold_event(&mut rec, &RawEvent::TaskAborted { task_id: "t1".into() });
        let step = fold_event(
            &mut rec,
            &msg(AgentMessage::say(9, SayKind::CompletionResult, "late")),
        );
        assert_eq!(step, FoldStep { changed: false, done: true });
        assert_eq!(rec.state, TaskState::Cancelled);
    }

    #[test]
    fn followup_question_becomes_last_result() {
        let mut rec = record();
        let step = fold_event(
            &mut rec,
            &msg(AgentMessage::ask(1, AskKind::Followup, "Which branch?")),
        );
        assert!(step.changed && !step.done);
        assert_eq!(rec.state, TaskState::Running);
        assert_eq!(rec.last_result, "Which branch?");
    }
}
