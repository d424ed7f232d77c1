//! Pure predicates over raw events.
//!
//! These decide what a per-task consumer ever sees: which events are dropped
//! as noise, which event ends a task's sequence, and which redelivered final
//! messages collapse into one.

use crate::events::{AskKind, RawEvent, SayKind};

/// Events that are never surfaced to a consumer.
///
/// `say: api_req_started` fires on every model request and carries no
/// useful signal for callers.
pub fn is_noise(event: &RawEvent) -> bool {
    event
        .message()
        .and_then(|m| m.say_kind())
        .is_some_and(|say| *say == SayKind::ApiReqStarted)
}

/// Whether a task sequence must stop after yielding `event`.
///
/// A non-partial follow-up question or completion result ends the sequence,
/// as does an abort. `TaskCompleted` deliberately does not: the completion
/// result message can still be in flight when it fires, and closing on it
/// would truncate the final answer.
pub fn is_terminal_for_sequence(event: &RawEvent) -> bool {
    match event {
        RawEvent::TaskAborted { .. } => true,
        RawEvent::Message { message, .. } if !message.partial => {
            matches!(message.ask_kind(), Some(AskKind::Followup))
                || matches!(message.say_kind(), Some(SayKind::CompletionResult))
        }
        _ => false,
    }
}

/// Non-partial `say: completion_result`: the task's final answer.
pub fn is_final_answer(event: &RawEvent) -> bool {
    event.message().is_some_and(|m| {
        !m.partial && matches!(m.say_kind(), Some(SayKind::CompletionResult))
    })
}

/// Both events are complete messages with identical content.
///
/// The host runtime may redeliver a finished message; callers must see each
/// one exactly once.
pub fn are_duplicate_completed_messages(a: &RawEvent, b: &RawEvent) -> bool {
    match (a, b) {
        (
            RawEvent::Message {
                task_id: ta,
                message: ma,
            },
            RawEvent::Message {
                task_id: tb,
                message: mb,
            },
        ) => !ma.partial && !mb.partial && ta == tb && ma == mb,
        _ => false,
    }
}
