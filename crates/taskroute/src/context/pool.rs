//! Bounded pool of OS worker threads.
//!
//! Admission is counted separately from the queue: a pool admits at most
//! `size + queue_depth` tasks (running + queued). Admitted tasks travel over an
//! unbounded FIFO channel, so with one free worker tasks start in submission
//! order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::{PoolConfig, SaturationPolicy};
use crate::error::{DispatchError, panic_message};
use crate::handle::{TaskCell, TaskResult};
use crate::stats::{Counters, PoolStats};
use crate::task::TaskId;

/// Runs jobs of type `J` on a pool thread.
pub(crate) trait Worker<J>: Send + 'static {
    fn run(&mut self, task_id: &TaskId, job: J) -> TaskResult;
}

impl<J, F> Worker<J> for F
where
    F: FnMut(&TaskId, J) -> TaskResult + Send + 'static,
{
    fn run(&mut self, task_id: &TaskId, job: J) -> TaskResult {
        self(task_id, job)
    }
}

/// Observer invoked with the outcome of a fire-and-forget task.
pub(crate) type ReportFn = Box<dyn FnOnce(&TaskId, TaskResult, Duration) + Send>;

/// Where a finished task's result goes.
pub(crate) enum Completion {
    Reply(oneshot::Sender<TaskResult>),
    Report(ReportFn),
}

impl Completion {
    fn deliver(self, task_id: &TaskId, result: TaskResult, elapsed: Duration) {
        match self {
            // Receiver gone means the caller dropped the handle.
            Completion::Reply(tx) => {
                let _ = tx.send(result);
            }
            Completion::Report(report) => report(task_id, result, elapsed),
        }
    }
}

pub(crate) struct Queued<J> {
    pub(crate) cell: Arc<TaskCell>,
    pub(crate) job: J,
    pub(crate) completion: Completion,
}

struct Slots {
    used: usize,
    closed: bool,
}

/// Counting admission gate with blocking and non-blocking acquire.
pub(crate) struct Admission {
    slots: Mutex<Slots>,
    freed: Condvar,
    capacity: usize,
}

impl Admission {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                used: 0,
                closed: false,
            }),
            freed: Condvar::new(),
            capacity,
        }
    }

    fn try_acquire(&self) -> Result<bool, DispatchError> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(DispatchError::ShutDown);
        }
        if slots.used >= self.capacity {
            return Ok(false);
        }
        slots.used += 1;
        Ok(true)
    }

    fn acquire(&self) -> Result<(), DispatchError> {
        let mut slots = self.slots.lock();
        while !slots.closed && slots.used >= self.capacity {
            self.freed.wait(&mut slots);
        }
        if slots.closed {
            return Err(DispatchError::ShutDown);
        }
        slots.used += 1;
        Ok(())
    }

    fn release(&self) {
        let mut slots = self.slots.lock();
        slots.used = slots.used.saturating_sub(1);
        drop(slots);
        self.freed.notify_one();
    }

    fn close(&self) {
        self.slots.lock().closed = true;
        self.freed.notify_all();
    }

    fn in_use(&self) -> usize {
        self.slots.lock().used
    }
}

/// Fixed-size pool of named OS threads, each owning one worker.
pub(crate) struct WorkerPool<J> {
    name: &'static str,
    config: PoolConfig,
    sender: Mutex<Option<Sender<Queued<J>>>>,
    admission: Arc<Admission>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Start one thread per worker. `workers.len()` is the pool size.
    pub(crate) fn start<W: Worker<J>>(
        name: &'static str,
        config: PoolConfig,
        workers: Vec<W>,
        counters: Arc<Counters>,
    ) -> Result<Self, DispatchError> {
        config.validate(name)?;
        let (tx, rx) = crossbeam_channel::unbounded::<Queued<J>>();
        let admission = Arc::new(Admission::new(config.capacity()));

        let mut threads = Vec::with_capacity(workers.len());
        for (index, worker) in workers.into_iter().enumerate() {
            let rx = rx.clone();
            let admission = Arc::clone(&admission);
            let counters = Arc::clone(&counters);
            let thread = std::thread::Builder::new()
                .name(format!("taskroute-{name}-{index}"))
                .spawn(move || worker_loop(name, worker, rx, admission, counters))
                .map_err(|e| {
                    DispatchError::configuration(format!("failed to start {name} worker: {e}"))
                })?;
            threads.push(thread);
        }

        debug!(pool = name, size = config.size, capacity = config.capacity(), "Worker pool started");

        Ok(Self {
            name,
            config,
            sender: Mutex::new(Some(tx)),
            admission,
            threads: Mutex::new(threads),
        })
    }

    /// Admit and enqueue a job according to the saturation policy.
    pub(crate) fn enqueue(&self, queued: Queued<J>) -> Result<(), DispatchError> {
        match self.config.saturation {
            SaturationPolicy::Reject => {
                if !self.admission.try_acquire()? {
                    return Err(DispatchError::ResourceExhausted {
                        pool: self.name,
                        capacity: self.config.capacity(),
                    });
                }
            }
            SaturationPolicy::Block => self.admission.acquire()?,
        }

        let Some(sender) = self.sender.lock().clone() else {
            self.admission.release();
            return Err(DispatchError::ShutDown);
        };
        if sender.send(queued).is_err() {
            self.admission.release();
            return Err(DispatchError::ShutDown);
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.config.size,
            capacity: self.config.capacity(),
            in_flight: self.admission.in_use(),
        }
    }

    /// Close admission, let queued jobs drain, then join every thread.
    pub(crate) fn shutdown(&self) {
        self.admission.close();
        self.sender.lock().take();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for thread in threads {
            if thread.join().is_err() {
                warn!(pool = self.name, "Worker thread panicked during shutdown");
            }
        }
        debug!(pool = self.name, "Worker pool stopped");
    }
}

fn worker_loop<J, W: Worker<J>>(
    pool: &'static str,
    mut worker: W,
    rx: Receiver<Queued<J>>,
    admission: Arc<Admission>,
    counters: Arc<Counters>,
) {
    for Queued {
        cell,
        job,
        completion,
    } in rx.iter()
    {
        if !cell.start() {
            debug!(pool, task_id = %cell.id(), "Skipping cancelled task");
            counters.record_cancelled();
            admission.release();
            continue;
        }

        debug!(pool, task_id = %cell.id(), "Task started");
        let started = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(|| worker.run(cell.id(), job))) {
            Ok(result) => result,
            Err(panic) => Err(DispatchError::TaskFailure(panic_message(panic.as_ref()))),
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => debug!(pool, task_id = %cell.id(), elapsed_ms = elapsed.as_millis() as u64, "Task completed"),
            Err(e) => debug!(pool, task_id = %cell.id(), error = %e, "Task failed"),
        }
        cell.finish(&result);
        counters.record_outcome(&result);
        // Free the slot before the caller can observe the result.
        admission.release();
        completion.deliver(cell.id(), result, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::TaskState;
    use serde_json::json;

    fn echo_worker(_: &TaskId, value: u64) -> TaskResult {
        Ok(json!(value))
    }

    fn queued(value: u64) -> (Queued<u64>, oneshot::Receiver<TaskResult>, Arc<TaskCell>) {
        let cell = TaskCell::new(TaskId::generate());
        let (tx, rx) = oneshot::channel();
        let queued = Queued {
            cell: Arc::clone(&cell),
            job: value,
            completion: Completion::Reply(tx),
        };
        (queued, rx, cell)
    }

    #[tokio::test]
    async fn test_pool_runs_jobs() {
        let pool = WorkerPool::start(
            "test",
            PoolConfig::new(2),
            vec![echo_worker as fn(&TaskId, u64) -> TaskResult; 2],
            Arc::new(Counters::default()),
        )
        .unwrap();

        let (job, rx, cell) = queued(7);
        pool.enqueue(job).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!(7));
        assert_eq!(cell.state(), TaskState::Completed);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_worker_is_contained() {
        let panicky = |_: &TaskId, value: u64| -> TaskResult {
            if value == 0 {
                panic!("zero");
            }
            Ok(json!(value))
        };
        let pool = WorkerPool::start(
            "test",
            PoolConfig::new(1),
            vec![panicky],
            Arc::new(Counters::default()),
        )
        .unwrap();

        let (bad, bad_rx, bad_cell) = queued(0);
        let (good, good_rx, _) = queued(1);
        pool.enqueue(bad).unwrap();
        pool.enqueue(good).unwrap();

        assert_eq!(
            bad_rx.await.unwrap(),
            Err(DispatchError::TaskFailure("panicked: zero".to_string()))
        );
        assert_eq!(bad_cell.state(), TaskState::Failed);
        assert_eq!(good_rx.await.unwrap().unwrap(), json!(1));
        pool.shutdown();
    }

    #[test]
    fn test_admission_gate() {
        let admission = Admission::new(1);
        assert!(admission.try_acquire().unwrap());
        assert!(!admission.try_acquire().unwrap());
        admission.release();
        assert!(admission.try_acquire().unwrap());
        admission.close();
        assert_eq!(admission.try_acquire(), Err(DispatchError::ShutDown));
        assert_eq!(admission.acquire(), Err(DispatchError::ShutDown));
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let pool = WorkerPool::start(
            "test",
            PoolConfig::new(1),
            vec![echo_worker as fn(&TaskId, u64) -> TaskResult],
            Arc::new(Counters::default()),
        )
        .unwrap();
        pool.shutdown();
        let (job, _rx, _) = queued(1);
        assert!(matches!(pool.enqueue(job), Err(DispatchError::ShutDown)));
        assert_eq!(pool.stats().in_flight, 0);
    }
}
