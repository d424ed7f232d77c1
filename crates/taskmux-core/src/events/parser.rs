//! NDJSON parser for the host runtime's raw event stream.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown
//! message tags preserved, unknown event types reported as a distinct error
//! so callers can skip them.

use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Parse a single NDJSON line into a raw event.
pub fn parse_line(line: &str) -> Result<RawEvent> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into a raw event.
pub fn parse_value(raw: &Value) -> Result<RawEvent> {
    let event_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::EventParse("Missing 'type' field".into()))?;

    let task_id = required_task_id(raw, "task_id")?;

    let event = match event_type {
        "message" => RawEvent::Message {
            task_id,
            message: parse_message(raw.get("message").unwrap_or(raw))?,
        },
        "task_created" => RawEvent::TaskCreated { task_id },
        "task_started" => RawEvent::TaskStarted { task_id },
        "task_paused" => RawEvent::TaskPaused { task_id },
        "task_unpaused" => RawEvent::TaskUnpaused { task_id },
        "task_mode_switched" => RawEvent::TaskModeSwitched {
            task_id,
            mode: string_field(raw, "mode"),
        },
        "task_spawned" => RawEvent::TaskSpawned {
            task_id,
            child_task_id: required_task_id(raw, "child_task_id")?,
        },
        "task_ask_responded" => RawEvent::TaskAskResponded { task_id },
        "task_completed" => RawEvent::TaskCompleted {
            task_id,
            token_usage: parse_token_usage(raw.get("token_usage")),
            tool_usage: parse_tool_usage(raw.get("tool_usage")),
        },
        "task_aborted" => RawEvent::TaskAborted { task_id },
        "task_token_usage_updated" => RawEvent::TaskTokenUsageUpdated {
            task_id,
            token_usage: parse_token_usage(raw.get("token_usage")),
        },
        "task_tool_failed" => RawEvent::TaskToolFailed {
            task_id,
            tool: string_field(raw, "tool"),
            error: string_field(raw, "error"),
        },
        other => return Err(Error::UnknownEventType(other.to_string())),
    };

    Ok(event)
}

fn required_task_id(raw: &Value, field: &str) -> Result<TaskId> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(TaskId::from)
        .ok_or_else(|| Error::EventParse(format!("Missing '{field}' field")))
}

fn string_field(raw: &Value, field: &str) -> String {
    raw.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_message(msg: &Value) -> Result<AgentMessage> {
    let ts = msg.get("ts").and_then(Value::as_u64).unwrap_or(0);

    let kind = match msg.get("type").and_then(|v| v.as_str()) {
        Some("say") => MessageKind::Say {
            say: SayKind::parse(
                msg.get("say")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::EventParse("Missing 'say' tag".into()))?,
            ),
        },
        Some("ask") => MessageKind::Ask {
            ask: AskKind::parse(
                msg.get("ask")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::EventParse("Missing 'ask' tag".into()))?,
            ),
        },
        Some(other) => {
            return Err(Error::EventParse(format!(
                "Unknown message type '{other}'"
            )));
        }
        None => return Err(Error::EventParse("Missing message 'type'".into())),
    };

    let text = msg.get("text").and_then(|v| v.as_str()).map(String::from);
    let partial = msg.get("partial").and_then(Value::as_bool).unwrap_or(false);

    Ok(AgentMessage {
        ts,
        kind,
        text,
        partial,
    })
}

fn parse_token_usage(val: Option<&Value>) -> TokenUsage {
    val.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn parse_tool_usage(val: Option<&Value>) -> ToolUsage {
    val.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_say_message() {
        let json = r#"{"type":"message","task_id":"t1","message":{"ts":10,"type":"say","say":"text","text":"hello","partial":true}}"#;
        let event = parse_line(json).unwrap();
        let RawEvent::Message { task_id, message } = event else {
            panic!("expected message event");
        };
        assert_eq!(task_id.as_str(), "t1");
        assert_eq!(message.ts, 10);
        assert_eq!(message.say_kind(), Some(&SayKind::Text));
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert!(message.partial);
    }

    #[test]
    fn parse_ask_followup() {
        let json = r#"{"type":"message","task_id":"t1","message":{"ts":1,"type":"ask","ask":"followup","text":"Which file?"}}"#;
        let event = parse_line(json).unwrap();
        let message = event.message().unwrap();
        assert_eq!(message.ask_kind(), Some(&AskKind::Followup));
        assert!(!message.partial);
    }

    #[test]
    fn unknown_say_tag_is_preserved() {
        let json = r#"{"type":"message","task_id":"t1","message":{"type":"say","say":"checkpoint_saved"}}"#;
        let event = parse_line(json).unwrap();
        assert_eq!(
            event.message().unwrap().say_kind(),
            Some(&SayKind::Other("checkpoint_saved".into()))
        );
    }

    #[test]
    fn parse_tool_failed() {
        let json = r#"{"type":"task_tool_failed","task_id":"t9","tool":"read_file","error":"permission denied"}"#;
        let event = parse_line(json).unwrap();
        assert_eq!(
            event,
            RawEvent::TaskToolFailed {
                task_id: "t9".into(),
                tool: "read_file".into(),
                error: "permission denied".into(),
            }
        );
    }

    #[test]
    fn parse_task_completed_with_usage() {
        let json = r#"{"type":"task_completed","task_id":"t1","token_usage":{"total_tokens_in":120,"total_tokens_out":40,"total_cost":0.5},"tool_usage":{"read_file":{"attempts":2,"failures":1}}}"#;
        let RawEvent::TaskCompleted {
            token_usage,
            tool_usage,
            ..
        } = parse_line(json).unwrap()
        else {
            panic!("expected task_completed");
        };
        assert_eq!(token_usage.total_tokens_in, 120);
        assert_eq!(token_usage.total_tokens_out, 40);
        assert_eq!(tool_usage["read_file"].failures, 1);
    }

    #[test]
    fn tolerant_reader_ignores_unknown_fields() {
        let json = r#"{"type":"task_started","task_id":"t1","extra":{"nested":true}}"#;
        assert!(parse_line(json).is_ok());
    }

    #[test]
    fn missing_task_id_is_an_error() {
        let json = r#"{"type":"task_aborted"}"#;
        assert!(matches!(parse_line(json), Err(Error::EventParse(_))));
    }

    #[test]
    fn unknown_type_is_reported() {
        let json = r#"{"type":"task_teleported","task_id":"t1"}"#;
        assert!(matches!(
            parse_line(json),
            Err(Error::UnknownEventType(t)) if t == "task_teleported"
        ));
    }

    #[test]
    fn serialized_event_parses_back() {
        let event = RawEvent::Message {
            task_id: "t1".into(),
            message: AgentMessage::say(5, SayKind::CompletionResult, "done"),
        };
        let line = serde_json::to_string(&event).unwrap();
        assert_eq!(parse_line(&line).unwrap(), event);
    }
}
