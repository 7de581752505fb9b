//! Async work on the dispatcher's tokio scheduler.
//!
//! Tasks are spawned onto the runtime captured at construction. In the demo
//! server that is a current-thread runtime, so a task that blocks instead of
//! awaiting stalls every other task on it.
//!
//! Only a current-thread runtime is accepted. On a multi-thread runtime a
//! blocking task would not stall its siblings and spawned tasks could start
//! out of submission order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tracing::debug;

use crate::affinity::Affinity;
use crate::context::ExecutionContext;
use crate::error::{DispatchError, panic_message};
use crate::handle::{TaskCell, TaskHandle, TaskResult};
use crate::stats::Counters;
use crate::task::{Payload, Task};

pub struct CooperativeContext {
    runtime: Handle,
    counters: Arc<Counters>,
    in_flight: Arc<AtomicUsize>,
}

impl CooperativeContext {
    pub(crate) fn new(runtime: Handle, counters: Arc<Counters>) -> Result<Self, DispatchError> {
        let flavor = runtime.runtime_flavor();
        if flavor != RuntimeFlavor::CurrentThread {
            return Err(DispatchError::configuration(format!(
                "cooperative context needs a current-thread tokio runtime, got {flavor:?}"
            )));
        }
        Ok(Self {
            runtime,
            counters,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Bind to the runtime of the calling task.
    pub(crate) fn current(counters: Arc<Counters>) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current().map_err(|e| {
            DispatchError::configuration(format!(
                "cooperative context needs a tokio runtime: {e}"
            ))
        })?;
        Self::new(runtime, counters)
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl ExecutionContext for CooperativeContext {
    fn affinity(&self) -> Affinity {
        Affinity::Cooperative
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        super::ensure_affinity(&task, Affinity::Cooperative)?;
        let (id, affinity, payload) = task.into_parts();
        let work = match payload {
            Payload::Future(work) => work,
            other => {
                return Err(DispatchError::configuration(format!(
                    "{} payload cannot run on the cooperative scheduler",
                    other.kind()
                )));
            }
        };

        let cell = TaskCell::new(id);
        let (tx, rx) = oneshot::channel::<TaskResult>();
        let task_cell = Arc::clone(&cell);
        let counters = Arc::clone(&self.counters);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::Relaxed);

        self.runtime.spawn(async move {
            if !task_cell.start() {
                debug!(task_id = %task_cell.id(), "Skipping cancelled task");
                counters.record_cancelled();
                in_flight.fetch_sub(1, Ordering::Relaxed);
                return;
            }

            let result = match AssertUnwindSafe(async move { work().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(DispatchError::TaskFailure(e.to_string())),
                Err(panic) => Err(DispatchError::TaskFailure(panic_message(panic.as_ref()))),
            };

            debug!(task_id = %task_cell.id(), ok = result.is_ok(), "Cooperative task finished");
            task_cell.finish(&result);
            counters.record_outcome(&result);
            in_flight.fetch_sub(1, Ordering::Relaxed);
            let _ = tx.send(result);
        });

        Ok(TaskHandle::new(affinity, cell, rx))
    }
}
