//! Aggregate report over all orchestrated tasks.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use taskmux_core::TaskId;

use super::record::{TaskState, TaskStatusRecord};

/// Snapshot of every task's status record, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub tasks: Vec<TaskStatusRecord>,
}

impl AggregateReport {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskStatusRecord> {
        self.tasks.iter().find(|r| &r.task_id == task_id)
    }

    /// Number of records currently in `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|r| r.state == state).count()
    }

    /// Every record has reached completed, failed or cancelled.
    pub fn all_settled(&self) -> bool {
        self.tasks.iter().all(|r| r.state.is_settled())
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, record) in self.tasks.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "## {} [{}]", record.source_query, record.state)?;
            if record.last_result.is_empty() {
                writeln!(f, "(no result yet)")?;
            } else {
                writeln!(f, "{}", record.last_result)?;
            }
            if matches!(record.state, TaskState::Completed | TaskState::Failed) {
                writeln!(f, "Task ID: {}", record.task_id)?;
            }
        }
        Ok(())
    }
}

/// Receiver of report updates.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &AggregateReport);
}

impl<F> ReportSink for F
where
    F: Fn(&AggregateReport) + Send + Sync,
{
    fn report(&self, report: &AggregateReport) {
        self(report);
    }
}

impl ReportSink for mpsc::UnboundedSender<AggregateReport> {
    fn report(&self, report: &AggregateReport) {
        if self.send(report.clone()).is_err() {
            trace!("Report receiver dropped");
        }
    }
}

/// Owned TaskId to record mapping that preserves insertion order.
#[derive(Debug, Default)]
pub(crate) struct RecordBook {
    order: Vec<TaskId>,
    records: HashMap<TaskId, TaskStatusRecord>,
}

impl RecordBook {
    pub fn insert(&mut self, record: TaskStatusRecord) {
        let task_id = record.task_id.clone();
        if self.records.insert(task_id.clone(), record).is_none() {
            self.order.push(task_id);
        }
    }

    pub fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskStatusRecord> {
        self.records.get_mut(task_id)
    }

    pub fn snapshot(&self) -> AggregateReport {
        AggregateReport {
            tasks: self
                .order
                .iter()
                .filter_map(|id| self.records.get(id))
                .cloned()
                .collect(),
        }
    }
}
