//! Wall-clock timing for a group of tasks.
//!
//! Not a scheduler: a [`TaskGroup`] only remembers when its first task was
//! submitted and measures until the last one resolves.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::handle::{TaskHandle, TaskResult};
use crate::task::{Task, TaskId, TaskOutput};

/// Await `future` and report how long it took.
pub async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = future.await;
    (output, started.elapsed())
}

/// Results of a joined [`TaskGroup`], in submission order.
#[derive(Debug)]
pub struct GroupReport {
    pub results: Vec<TaskResult>,
    /// First submission to last completion.
    pub elapsed: Duration,
}

impl GroupReport {
    /// All outputs, or the first error in submission order.
    pub fn into_outputs(self) -> Result<Vec<TaskOutput>, DispatchError> {
        self.results.into_iter().collect()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[derive(Debug, Default)]
pub struct TaskGroup {
    handles: Vec<TaskHandle>,
    first_submitted: Option<Instant>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `task` through `dispatcher` and track its handle.
    pub fn submit(&mut self, dispatcher: &Dispatcher, task: Task) -> Result<TaskId, DispatchError> {
        let submitted = Instant::now();
        let handle = dispatcher.submit(task)?;
        self.first_submitted.get_or_insert(submitted);
        let id = handle.id().clone();
        self.handles.push(handle);
        Ok(id)
    }

    /// Track an already-submitted handle.
    pub fn push(&mut self, handle: TaskHandle) {
        let submitted = Instant::now() - handle.elapsed();
        self.first_submitted = Some(match self.first_submitted {
            Some(first) => first.min(submitted),
            None => submitted,
        });
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task and report results plus elapsed time.
    pub async fn join_all(self) -> GroupReport {
        let first_submitted = self.first_submitted.unwrap_or_else(Instant::now);
        let results = join_all(self.handles.into_iter().map(TaskHandle::join)).await;
        GroupReport {
            results,
            elapsed: first_submitted.elapsed(),
        }
    }
}
