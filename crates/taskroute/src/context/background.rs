//! Fire-and-forget work on the thread pool.
//!
//! The caller gets an already-completed acknowledgment. The real outcome is
//! logged and, when a report channel is configured, sent there. The channel
//! is bounded: a report that finds it full is dropped with a warning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::affinity::Affinity;
use crate::context::pool::Completion;
use crate::context::{ExecutionContext, ThreadContext};
use crate::error::DispatchError;
use crate::handle::{TaskCell, TaskHandle, TaskResult};
use crate::stats::PoolStats;
use crate::task::{Payload, Task, TaskId};

/// Outcome of a background task, delivered out of band.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundReport {
    pub task_id: TaskId,
    pub outcome: TaskResult,
    pub elapsed: Duration,
}

pub struct BackgroundContext {
    threads: Arc<ThreadContext>,
    reports: Option<mpsc::Sender<BackgroundReport>>,
}

impl BackgroundContext {
    pub(crate) fn new(
        threads: Arc<ThreadContext>,
        reports: Option<mpsc::Sender<BackgroundReport>>,
    ) -> Self {
        Self { threads, reports }
    }
}

impl ExecutionContext for BackgroundContext {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        super::ensure_affinity(&task, Affinity::Background)?;
        let (id, affinity, payload) = task.into_parts();
        let work = match payload {
            Payload::Blocking(work) => work,
            other => {
                return Err(DispatchError::configuration(format!(
                    "{} payload cannot run in the background",
                    other.kind()
                )));
            }
        };

        let reports = self.reports.clone();
        let report = Box::new(move |task_id: &TaskId, outcome: TaskResult, elapsed: Duration| {
            match &outcome {
                Ok(_) => info!(task_id = %task_id, elapsed_ms = elapsed.as_millis() as u64, "Background task completed"),
                Err(e) => warn!(task_id = %task_id, error = %e, "Background task failed"),
            }
            let Some(reports) = reports else {
                return;
            };
            let report = BackgroundReport {
                task_id: task_id.clone(),
                outcome,
                elapsed,
            };
            match reports.try_send(report) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(task_id = %task_id, "Background report channel full, dropping report");
                }
            }
        });

        // The worker tracks its own cell; the caller only sees the acknowledgment.
        self.threads
            .enqueue(TaskCell::new(id.clone()), work, Completion::Report(report))?;
        Ok(TaskHandle::acknowledged(affinity, id))
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        self.threads.pool_stats()
    }
}
