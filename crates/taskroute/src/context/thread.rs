//! Blocking work on a fixed pool of OS threads.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::affinity::Affinity;
use crate::config::PoolConfig;
use crate::context::ExecutionContext;
use crate::context::pool::{Completion, Queued, WorkerPool};
use crate::error::DispatchError;
use crate::handle::{TaskCell, TaskHandle, TaskResult};
use crate::stats::{Counters, PoolStats};
use crate::task::{BoxedBlockingWork, Payload, Task, TaskId};

fn run_blocking(_task_id: &TaskId, work: BoxedBlockingWork) -> TaskResult {
    work().map_err(|e| DispatchError::TaskFailure(e.to_string()))
}

/// Bounded worker-thread pool. Blocking calls here never stall the
/// cooperative scheduler.
pub struct ThreadContext {
    pool: WorkerPool<BoxedBlockingWork>,
}

impl ThreadContext {
    pub(crate) fn start(config: PoolConfig, counters: Arc<Counters>) -> Result<Self, DispatchError> {
        let workers = vec![run_blocking as fn(&TaskId, BoxedBlockingWork) -> TaskResult; config.size];
        Ok(Self {
            pool: WorkerPool::start("thread", config, workers, counters)?,
        })
    }

    /// Queue blocking work with an explicit completion target.
    pub(crate) fn enqueue(
        &self,
        cell: Arc<TaskCell>,
        work: BoxedBlockingWork,
        completion: Completion,
    ) -> Result<(), DispatchError> {
        self.pool.enqueue(Queued {
            cell,
            job: work,
            completion,
        })
    }
}

impl ExecutionContext for ThreadContext {
    fn affinity(&self) -> Affinity {
        Affinity::Thread
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        super::ensure_affinity(&task, Affinity::Thread)?;
        let (id, affinity, payload) = task.into_parts();
        let work = match payload {
            Payload::Blocking(work) => work,
            other => {
                return Err(DispatchError::configuration(format!(
                    "{} payload cannot run on the thread pool",
                    other.kind()
                )));
            }
        };

        let cell = TaskCell::new(id);
        let (tx, rx) = oneshot::channel();
        self.enqueue(Arc::clone(&cell), work, Completion::Reply(tx))?;
        Ok(TaskHandle::new(affinity, cell, rx))
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(self.pool.stats())
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::TaskState;
    use serde_json::json;

    #[tokio::test]
    async fn test_thread_task_runs_off_scheduler() {
        let context = ThreadContext::start(PoolConfig::new(1), Arc::new(Counters::default())).unwrap();
        let caller = std::thread::current().id();
        let handle = context
            .submit(Task::thread(move || {
                Ok(json!(std::thread::current().id() != caller))
            }))
            .unwrap();
        assert_eq!(handle.await.unwrap(), json!(true));
        context.shutdown();
    }

    #[tokio::test]
    async fn test_payload_error_is_captured() {
        let context = ThreadContext::start(PoolConfig::new(1), Arc::new(Counters::default())).unwrap();
        let handle = context
            .submit(Task::thread(|| Err("disk on fire".into())))
            .unwrap();
        let id = handle.id().clone();
        let cell_state = handle.started().await;
        assert_ne!(cell_state, TaskState::Pending);
        let err = handle.join().await.unwrap_err();
        assert_eq!(err, DispatchError::TaskFailure("disk on fire".to_string()));
        assert!(!id.as_str().is_empty());
        context.shutdown();
    }

    #[test]
    fn test_wrong_affinity_is_rejected() {
        let context = ThreadContext::start(PoolConfig::new(1), Arc::new(Counters::default())).unwrap();
        let err = context.submit(Task::background(|| Ok(json!(null)))).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
        context.shutdown();
    }
}
