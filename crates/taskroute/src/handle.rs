//! Task handles, the caller's view of a submitted task.
//!
//! State lives in a `tokio::sync::watch` channel shared between the
//! execution context (which moves the task forward) and the handle (which
//! may cancel a pending task and observe progress). The result travels over
//! a `oneshot` channel and is moved out by [`TaskHandle::join`].

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::affinity::Affinity;
use crate::error::DispatchError;
use crate::state_machine::{TaskState, validate_transition};
use crate::task::{TaskId, TaskOutput};

/// Final outcome delivered to a handle.
pub type TaskResult = Result<TaskOutput, DispatchError>;

/// Shared state cell for one task.
pub(crate) struct TaskCell {
    id: TaskId,
    state: watch::Sender<TaskState>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId) -> Arc<Self> {
        let (state, _) = watch::channel(TaskState::Pending);
        Arc::new(Self { id, state })
    }

    /// A cell that has already run to completion (background acknowledgments).
    pub(crate) fn acknowledged(id: TaskId) -> Arc<Self> {
        let (state, _) = watch::channel(TaskState::Completed);
        Arc::new(Self { id, state })
    }

    pub(crate) fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Atomically apply a validated transition.
    pub(crate) fn transition(&self, to: TaskState) -> Result<(), DispatchError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            match validate_transition(*current, to) {
                Ok(()) => {
                    *current = to;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    /// Pending -> Running. Returns `false` when the task was cancelled first.
    pub(crate) fn start(&self) -> bool {
        self.transition(TaskState::Running).is_ok()
    }

    /// Running -> Completed | Failed, following the result.
    pub(crate) fn finish(&self, result: &TaskResult) {
        let to = match result {
            Ok(_) => TaskState::Completed,
            Err(_) => TaskState::Failed,
        };
        if let Err(e) = self.transition(to) {
            debug!(task_id = %self.id, error = %e, "Ignoring late state transition");
        }
    }
}

/// Handle to a submitted task.
///
/// Awaiting the handle (or calling [`join`](TaskHandle::join)) suspends until
/// the task resolves and hands its result to the caller.
pub struct TaskHandle {
    affinity: Affinity,
    cell: Arc<TaskCell>,
    result: Option<oneshot::Receiver<TaskResult>>,
    submitted_at: Instant,
}

impl TaskHandle {
    pub(crate) fn new(
        affinity: Affinity,
        cell: Arc<TaskCell>,
        result: oneshot::Receiver<TaskResult>,
    ) -> Self {
        Self {
            affinity,
            cell,
            result: Some(result),
            submitted_at: Instant::now(),
        }
    }

    /// An already-resolved acknowledgment with no result.
    pub(crate) fn acknowledged(affinity: Affinity, id: TaskId) -> Self {
        Self {
            affinity,
            cell: TaskCell::acknowledged(id),
            result: None,
            submitted_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &TaskId {
        self.cell.id()
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Time since the task was handed to its execution context.
    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Cancel the task if it has not started yet.
    ///
    /// Returns `true` when the task moved to `Cancelled`. Running, finished
    /// and background tasks cannot be cancelled.
    pub fn cancel(&self) -> bool {
        if self.result.is_none() {
            return false;
        }
        match self.cell.transition(TaskState::Cancelled) {
            Ok(()) => {
                debug!(task_id = %self.id(), affinity = %self.affinity, "Cancelled pending task");
                true
            }
            Err(e) => {
                debug!(task_id = %self.id(), error = %e, "Cancel refused");
                false
            }
        }
    }

    /// Wait until the task has left `Pending` and return the state it moved to.
    pub async fn started(&self) -> TaskState {
        let mut rx = self.cell.subscribe();
        match rx.wait_for(|state| *state != TaskState::Pending).await {
            Ok(state) => *state,
            Err(_) => self.cell.state(),
        }
    }

    /// Wait for the task to resolve and take its result.
    ///
    /// A background acknowledgment resolves at once with `null`.
    pub async fn join(self) -> TaskResult {
        let Some(rx) = self.result else {
            return Ok(TaskOutput::Null);
        };
        if self.cell.state() == TaskState::Cancelled {
            return Err(DispatchError::Cancelled(self.cell.id().to_string()));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) if self.cell.state() == TaskState::Cancelled => {
                Err(DispatchError::Cancelled(self.cell.id().to_string()))
            }
            Err(_) => Err(DispatchError::task_failure(
                "task was dropped before completion",
            )),
        }
    }
}

impl IntoFuture for TaskHandle {
    type Output = TaskResult;
    type IntoFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.join())
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", self.id())
            .field("affinity", &self.affinity)
            .field("state", &self.state())
            .finish()
    }
}
