//! Execution contexts: where a task actually runs.
//!
//! Each context owns one kind of execution resource:
//! - [`cooperative`]: the single-threaded tokio scheduler the dispatcher was built on
//! - [`thread`]: a fixed pool of OS threads for blocking work
//! - [`process`]: a fixed pool of worker processes for CPU-heavy work
//! - [`background`]: thread pool work acknowledged before it runs
//!
//! [`pool`] holds the admission and queueing logic shared by the OS-thread
//! backed contexts.

pub mod background;
pub mod cooperative;
pub(crate) mod pool;
pub mod process;
pub mod thread;

use crate::affinity::Affinity;
use crate::error::DispatchError;
use crate::handle::TaskHandle;
use crate::stats::PoolStats;
use crate::task::Task;

pub use background::{BackgroundContext, BackgroundReport};
pub use cooperative::CooperativeContext;
pub use process::ProcessContext;
pub use thread::ThreadContext;

/// Capability shared by every execution context.
pub trait ExecutionContext: Send + Sync {
    /// The affinity this context serves.
    fn affinity(&self) -> Affinity;

    /// Accept a task and return its handle.
    ///
    /// Only blocks when the context is saturated and configured to block.
    fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError>;

    /// Pool occupancy, for contexts backed by a bounded pool.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }

    /// Stop accepting work and release execution resources.
    fn shutdown(&self) {}
}

/// Reject a task routed to the wrong context.
pub(crate) fn ensure_affinity(task: &Task, expected: Affinity) -> Result<(), DispatchError> {
    if task.affinity() == expected {
        Ok(())
    } else {
        Err(DispatchError::configuration(format!(
            "{} task submitted to the {} context",
            task.affinity(),
            expected
        )))
    }
}
