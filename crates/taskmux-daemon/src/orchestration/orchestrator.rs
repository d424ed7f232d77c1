//! Bounded-concurrency task orchestrator.
//!
//! [`Orchestrator`] is the high-level coordinator that:
//! - admits queries through an [`AdmissionPool`] of size K
//! - starts one runtime task per admitted query
//! - folds each task's event sequence into a [`TaskStatusRecord`]
//! - emits a fresh [`AggregateReport`] after every change

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use taskmux_core::TaskId;
use taskmux_core::config::OrchestratorConfig;

use crate::mux::{MuxError, TaskMultiplexer};
use crate::runtime::{AgentRuntime, RuntimeError};

use super::pool::{AdmissionPermit, AdmissionPool};
use super::record::{TaskStatusRecord, fold_event};
use super::report::{AggregateReport, RecordBook, ReportSink};

/// One-shot callback run once the last task of the first concurrency wave
/// has its id.
pub type WaveHook = Box<dyn FnOnce(&TaskId) + Send>;

/// Errors from the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid concurrency limit: {0}")]
    InvalidConcurrency(#[source] taskmux_core::Error),

    /// The runtime failed before assigning a task id.
    #[error("Failed to start task for query {query:?}: {source}")]
    StartFailed {
        query: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Cannot consume task {task_id}: {source}")]
    Sequence {
        task_id: TaskId,
        #[source]
        source: MuxError,
    },

    #[error("Query worker for {query:?} panicked")]
    WorkerPanicked { query: String },
}

/// Outcome of one orchestrator run.
#[derive(Debug)]
pub struct RunSummary {
    /// The final aggregate report.
    pub report: AggregateReport,
    /// Per-query outcome, in submission order.
    pub results: Vec<Result<TaskId, OrchestratorError>>,
    /// Most queries that were admitted at the same time.
    pub peak_concurrency: usize,
}

impl RunSummary {
    /// Ids of the queries that started.
    pub fn task_ids(&self) -> Vec<&TaskId> {
        self.results.iter().filter_map(|r| r.as_ref().ok()).collect()
    }

    /// Queries that never obtained a task id.
    pub fn failures(&self) -> impl Iterator<Item = &OrchestratorError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }
}

/// Runs batches of queries against the host runtime under a concurrency cap.
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn AgentRuntime>,
    mux: TaskMultiplexer,
    config: OrchestratorConfig,
}

/// State shared by the query workers of one run.
struct RunContext {
    runtime: Arc<dyn AgentRuntime>,
    mux: TaskMultiplexer,
    book: Mutex<RecordBook>,
    sink: Box<dyn ReportSink>,
    hook: Mutex<Option<WaveHook>>,
    hook_index: usize,
}

impl RunContext {
    fn lock(&self) -> MutexGuard<'_, RecordBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `update` to the book and emit the resulting report.
    ///
    /// The sink runs under the lock so reports reach it in mutation order.
    #[allow(clippy::significant_drop_tightening)]
    fn publish(&self, update: impl FnOnce(&mut RecordBook) -> bool) {
        let mut book = self.lock();
        if update(&mut book) {
            self.sink.report(&book.snapshot());
        }
    }

    fn fire_hook(&self, index: usize, task_id: &TaskId) {
        if index != self.hook_index {
            return;
        }
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            debug!(%task_id, index, "Running wave hook");
            hook(task_id);
        }
    }
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        mux: TaskMultiplexer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runtime,
            mux,
            config,
        }
    }

    /// Run `queries` with at most `limit` in flight.
    ///
    /// `None` selects the configured default limit. The sink receives the
    /// initial empty report and then a new snapshot after every change.
    pub async fn run<S>(
        &self,
        queries: Vec<String>,
        limit: Option<usize>,
        sink: S,
    ) -> Result<RunSummary, OrchestratorError>
    where
        S: ReportSink + 'static,
    {
        self.run_with_hook(queries, limit, sink, None).await
    }

    /// Like [`run`](Self::run), additionally calling `hook` exactly once with
    /// the id of the query that fills the first concurrency wave (query
    /// `min(K, N) - 1`). The hook is skipped if that query fails to start.
    pub async fn run_with_hook<S>(
        &self,
        queries: Vec<String>,
        limit: Option<usize>,
        sink: S,
        hook: Option<WaveHook>,
    ) -> Result<RunSummary, OrchestratorError>
    where
        S: ReportSink + 'static,
    {
        let limit = self
            .config
            .validate_concurrency(limit.unwrap_or(self.config.default_concurrency))
            .map_err(OrchestratorError::InvalidConcurrency)?;

        let total = queries.len();
        info!(queries = total, limit, "Orchestration started");

        let ctx = Arc::new(RunContext {
            runtime: Arc::clone(&self.runtime),
            mux: self.mux.clone(),
            book: Mutex::new(RecordBook::default()),
            sink: Box::new(sink),
            hook: Mutex::new(hook),
            hook_index: limit.min(total).saturating_sub(1),
        });
        ctx.publish(|_| true);

        let pool = AdmissionPool::new(limit);
        let mut workers = JoinSet::new();
        let mut results: Vec<Option<Result<TaskId, OrchestratorError>>> =
            std::iter::repeat_with(|| None).take(total).collect();

        for (index, query) in queries.iter().enumerate() {
            let permit = pool.acquire().await;
            debug!(
                index,
                query = %query,
                in_flight = pool.in_flight(),
                limit = pool.limit(),
                "Query admitted"
            );
            let ctx = Arc::clone(&ctx);
            let query = query.clone();
            workers.spawn(async move { (index, run_query(ctx, index, query, permit).await) });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
                Err(e) => error!(error = %e, "Query worker failed"),
            }
        }

        let results: Vec<_> = results
            .into_iter()
            .zip(queries)
            .map(|(outcome, query)| {
                outcome.unwrap_or_else(|| Err(OrchestratorError::WorkerPanicked { query }))
            })
            .collect();

        let report = ctx.lock().snapshot();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            queries = total,
            failed,
            peak = pool.high_water_mark(),
            "Orchestration finished"
        );

        Ok(RunSummary {
            report,
            results,
            peak_concurrency: pool.high_water_mark(),
        })
    }
}

/// Start one query and fold its sequence until the task settles.
///
/// The admission permit is held until this returns.
async fn run_query(
    ctx: Arc<RunContext>,
    index: usize,
    query: String,
    _permit: AdmissionPermit,
) -> Result<TaskId, OrchestratorError> {
    let task_id = match ctx.runtime.start_task(&query).await {
        Ok(task_id) => task_id,
        Err(source) => {
            let placeholder = TaskId::placeholder();
            warn!(task_id = %placeholder, query = %query, error = %source, "Task failed to start");
            ctx.publish(|book| {
                book.insert(TaskStatusRecord::start_failed(
                    placeholder.clone(),
                    query.as_str(),
                    &source,
                ));
                true
            });
            return Err(OrchestratorError::StartFailed { query, source });
        }
    };

    info!(%task_id, query = %query, "Task started");
    ctx.publish(|book| {
        book.insert(TaskStatusRecord::created(task_id.clone(), query.as_str()));
        true
    });
    ctx.fire_hook(index, &task_id);

    let mut sequence =
        ctx.mux
            .open_sequence(&task_id)
            .map_err(|source| OrchestratorError::Sequence {
                task_id: task_id.clone(),
                source,
            })?;

    while let Some(event) = sequence.next().await {
        let mut done = false;
        ctx.publish(|book| {
            let Some(record) = book.get_mut(&task_id) else {
                return false;
            };
            let step = fold_event(record, &event);
            done = step.done;
            if step.changed {
                debug!(%task_id, state = %record.state, kind = event.kind(), "Record updated");
            }
            step.changed
        });
        if done {
            break;
        }
    }

    debug!(%task_id, "Fold finished");
    Ok(task_id)
}
