//! Host agent runtime seam.
//!
//! The multiplexer and orchestrator never talk to a concrete agent; they go
//! through [`AgentRuntime`], which exposes the runtime's task control calls
//! and its single shared event stream.

mod scripted;

use async_trait::async_trait;
use tokio::sync::broadcast;

use taskmux_core::{RawEvent, TaskId};

pub use scripted::{ScriptedRuntime, ScriptedRuntimeBuilder};

/// Control surface of the host agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a new task for `query` and return the id the runtime assigned.
    async fn start_task(&self, query: &str) -> Result<TaskId, RuntimeError>;

    /// Send a follow-up message (e.g. an answer to a question) to a task.
    async fn send_message(&self, task_id: &TaskId, text: &str) -> Result<(), RuntimeError>;

    /// Reopen a task from the runtime's history.
    async fn resume_task(&self, task_id: &TaskId) -> Result<(), RuntimeError>;

    /// Subscribe to the global event stream covering every task.
    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;
}

/// Errors reported by the host runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime could not be reached or is not running.
    #[error("Agent runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// The runtime refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}
