//! Raw event types emitted by the host agent runtime.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Opaque task identifier assigned by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthesize an id for a task that never obtained one from the runtime.
    pub fn placeholder() -> Self {
        Self(format!("unstarted-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with("unstarted-")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle or progress notification for a single task.
///
/// Every variant names the task it belongs to, so routing is a plain match
/// rather than a lookup through the emitting context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Message {
        task_id: TaskId,
        message: AgentMessage,
    },
    TaskCreated {
        task_id: TaskId,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskPaused {
        task_id: TaskId,
    },
    TaskUnpaused {
        task_id: TaskId,
    },
    TaskModeSwitched {
        task_id: TaskId,
        mode: String,
    },
    TaskSpawned {
        task_id: TaskId,
        child_task_id: TaskId,
    },
    TaskAskResponded {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        token_usage: TokenUsage,
        tool_usage: ToolUsage,
    },
    TaskAborted {
        task_id: TaskId,
    },
    TaskTokenUsageUpdated {
        task_id: TaskId,
        token_usage: TokenUsage,
    },
    TaskToolFailed {
        task_id: TaskId,
        tool: String,
        error: String,
    },
}

impl RawEvent {
    /// The task this event belongs to.
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Message { task_id, .. }
            | Self::TaskCreated { task_id }
            | Self::TaskStarted { task_id }
            | Self::TaskPaused { task_id }
            | Self::TaskUnpaused { task_id }
            | Self::TaskModeSwitched { task_id, .. }
            | Self::TaskSpawned { task_id, .. }
            | Self::TaskAskResponded { task_id }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskAborted { task_id }
            | Self::TaskTokenUsageUpdated { task_id, .. }
            | Self::TaskToolFailed { task_id, .. } => task_id,
        }
    }

    /// Wire name of the event kind (the `type` tag).
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::TaskCreated { .. } => "task_created",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskPaused { .. } => "task_paused",
            Self::TaskUnpaused { .. } => "task_unpaused",
            Self::TaskModeSwitched { .. } => "task_mode_switched",
            Self::TaskSpawned { .. } => "task_spawned",
            Self::TaskAskResponded { .. } => "task_ask_responded",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskAborted { .. } => "task_aborted",
            Self::TaskTokenUsageUpdated { .. } => "task_token_usage_updated",
            Self::TaskToolFailed { .. } => "task_tool_failed",
        }
    }

    /// The nested message payload, if this is a `Message` event.
    pub const fn message(&self) -> Option<&AgentMessage> {
        match self {
            Self::Message { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Progress or response message from the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentMessage {
    /// Host timestamp in milliseconds.
    pub ts: u64,
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Still streaming; more content for the same message may follow.
    pub partial: bool,
}

impl AgentMessage {
    pub fn say(ts: u64, say: SayKind, text: impl Into<String>) -> Self {
        Self {
            ts,
            kind: MessageKind::Say { say },
            text: Some(text.into()),
            partial: false,
        }
    }

    pub fn ask(ts: u64, ask: AskKind, text: impl Into<String>) -> Self {
        Self {
            ts,
            kind: MessageKind::Ask { ask },
            text: Some(text.into()),
            partial: false,
        }
    }

    #[must_use]
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub const fn say_kind(&self) -> Option<&SayKind> {
        match &self.kind {
            MessageKind::Say { say } => Some(say),
            MessageKind::Ask { .. } => None,
        }
    }

    pub const fn ask_kind(&self) -> Option<&AskKind> {
        match &self.kind {
            MessageKind::Ask { ask } => Some(ask),
            MessageKind::Say { .. } => None,
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Whether the agent is reporting (`say`) or asking (`ask`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Say { say: SayKind },
    Ask { ask: AskKind },
}

/// `say` variant tag. Unknown tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SayKind {
    Text,
    CompletionResult,
    ApiReqStarted,
    Error,
    Reasoning,
    UserFeedback,
    Other(String),
}

impl SayKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "completion_result" => Self::CompletionResult,
            "api_req_started" => Self::ApiReqStarted,
            "error" => Self::Error,
            "reasoning" => Self::Reasoning,
            "user_feedback" => Self::UserFeedback,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::CompletionResult => "completion_result",
            Self::ApiReqStarted => "api_req_started",
            Self::Error => "error",
            Self::Reasoning => "reasoning",
            Self::UserFeedback => "user_feedback",
            Self::Other(tag) => tag,
        }
    }
}

/// `ask` variant tag. Unknown tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AskKind {
    Followup,
    Command,
    Tool,
    CompletionResult,
    ApiReqFailed,
    ResumeTask,
    Other(String),
}

impl AskKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "followup" => Self::Followup,
            "command" => Self::Command,
            "tool" => Self::Tool,
            "completion_result" => Self::CompletionResult,
            "api_req_failed" => Self::ApiReqFailed,
            "resume_task" => Self::ResumeTask,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Followup => "followup",
            Self::Command => "command",
            Self::Tool => "tool",
            Self::CompletionResult => "completion_result",
            Self::ApiReqFailed => "api_req_failed",
            Self::ResumeTask => "resume_task",
            Self::Other(tag) => tag,
        }
    }
}

impl Serialize for SayKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl Serialize for AskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Token usage statistics for a task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub total_tokens_in: u64,
    #[serde(default)]
    pub total_tokens_out: u64,
    #[serde(default)]
    pub total_cache_writes: Option<u64>,
    #[serde(default)]
    pub total_cache_reads: Option<u64>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub context_tokens: u64,
}

/// Per-tool attempt/failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolUsageCounts {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failures: u32,
}

/// Tool usage keyed by tool name.
pub type ToolUsage = BTreeMap<String, ToolUsageCounts>;
