//! Bounded-concurrency orchestration of runtime tasks.
//!
//! - [`AdmissionPool`]: Semaphore-based limiter for concurrently running queries.
//! - [`fold_event`]: folds one task event into its [`TaskStatusRecord`].
//! - [`Orchestrator`]: admits queries, consumes their task sequences and
//!   reports an [`AggregateReport`] after every change.

pub mod orchestrator;
pub mod pool;
pub mod record;
pub mod report;

pub use orchestrator::{Orchestrator, OrchestratorError, RunSummary, WaveHook};
pub use pool::{AdmissionPermit, AdmissionPool};
pub use record::{CANCELLED_RESULT, FoldStep, TaskState, TaskStatusRecord, fold_event};
pub use report::{AggregateReport, ReportSink};
