//! Transport-facing facade over the runtime and the multiplexer.
//!
//! Data flow:
//! ```text
//! runtime events → TaskMultiplexer → per-task channel → TaskSequence → transport
//! transport start/message/resume → TaskHub → AgentRuntime
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use taskmux_core::TaskId;
use taskmux_core::config::Config;

use crate::mux::{MultiplexerStats, MuxError, TaskMultiplexer, TaskSequence};
use crate::orchestration::Orchestrator;
use crate::runtime::{AgentRuntime, RuntimeError};

/// Errors surfaced to transport layers.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Mux(#[from] MuxError),
}

/// Owns the runtime handle and the multiplexer attached to its event stream.
pub struct TaskHub {
    runtime: Arc<dyn AgentRuntime>,
    mux: TaskMultiplexer,
    config: Config,
    pump: JoinHandle<()>,
}

impl TaskHub {
    /// Subscribe a fresh multiplexer to `runtime`'s event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(runtime: Arc<dyn AgentRuntime>, config: Config) -> Result<Self, HubError> {
        let mux = TaskMultiplexer::new(config.multiplexer.clone());
        let pump = mux.attach(runtime.subscribe())?;
        info!("Task hub ready");
        Ok(Self {
            runtime,
            mux,
            config,
            pump,
        })
    }

    /// Start a task and return its id. Open its sequence to follow it.
    pub async fn start_task(&self, query: &str) -> Result<TaskId, HubError> {
        let task_id = self.runtime.start_task(query).await?;
        debug!(%task_id, "Task started via hub");
        Ok(task_id)
    }

    /// Answer a task (e.g. its follow-up question).
    ///
    /// The task's channel is revived first so the reply's events are kept
    /// until a new sequence is opened.
    pub async fn send_message(&self, task_id: &TaskId, text: &str) -> Result<(), HubError> {
        self.mux.revive(task_id);
        self.runtime.send_message(task_id, text).await?;
        Ok(())
    }

    /// Resume a task from the runtime's history.
    pub async fn resume_task(&self, task_id: &TaskId) -> Result<(), HubError> {
        self.mux.revive(task_id);
        self.runtime.resume_task(task_id).await?;
        Ok(())
    }

    pub fn open_sequence(&self, task_id: &TaskId) -> Result<TaskSequence, HubError> {
        Ok(self.mux.open_sequence(task_id)?)
    }

    /// Tear down a task's channel after its transport disconnected.
    pub fn close_sequence(&self, task_id: &TaskId) -> bool {
        self.mux.close_sequence(task_id)
    }

    /// Orchestrator sharing this hub's runtime and multiplexer.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.runtime),
            self.mux.clone(),
            self.config.orchestrator.clone(),
        )
    }

    pub fn multiplexer(&self) -> &TaskMultiplexer {
        &self.mux
    }

    pub fn stats(&self) -> MultiplexerStats {
        self.mux.stats()
    }
}

impl Drop for TaskHub {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
