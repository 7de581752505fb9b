//! Serializable jobs on a fixed pool of worker processes.
//!
//! Every pool thread owns one long-lived child process and talks to it over
//! the JSON-lines protocol in [`crate::worker::protocol`]. A child that dies
//! or misbehaves fails the current task and is replaced before the next one.
//! Overrunning the configured job timeout counts as misbehaving.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::affinity::Affinity;
use crate::config::ProcessPoolConfig;
use crate::context::ExecutionContext;
use crate::context::pool::{Completion, Queued, Worker, WorkerPool};
use crate::error::DispatchError;
use crate::handle::{TaskCell, TaskHandle, TaskResult};
use crate::stats::{Counters, PoolStats};
use crate::task::{JobRequest, Payload, Task, TaskId};
use crate::worker::protocol::{WorkerRequest, WorkerResponse};

/// A running worker process with its protocol pipes.
///
/// Responses are read on a dedicated thread so a call can give up after the
/// job timeout. The reader ends when the child's stdout closes.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<io::Result<String>>,
}

impl WorkerProcess {
    fn spawn(config: &ProcessPoolConfig) -> io::Result<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout not captured"))?;
        let pid = child.id();
        let lines = spawn_reader(pid, stdout)?;
        debug!(pid, program = %config.program.display(), "Spawned worker process");
        Ok(Self {
            child,
            stdin,
            lines,
        })
    }

    fn call(
        &mut self,
        request: &WorkerRequest,
        timeout: Option<Duration>,
    ) -> io::Result<WorkerResponse> {
        serde_json::to_writer(&mut self.stdin, request).map_err(io::Error::other)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let received = match timeout {
            Some(timeout) => self.lines.recv_timeout(timeout),
            None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let line = match received {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("job timed out after {}ms", timeout.unwrap_or_default().as_millis()),
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "worker process closed its output",
                ));
            }
        };
        serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Forward every line of `stdout` to the returned channel until EOF.
fn spawn_reader(pid: u32, stdout: ChildStdout) -> io::Result<Receiver<io::Result<String>>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name(format!("taskroute-reader-{pid}"))
        .spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Pool-thread side of one process slot.
struct ProcessWorker {
    config: Arc<ProcessPoolConfig>,
    process: Option<WorkerProcess>,
}

impl Worker<JobRequest> for ProcessWorker {
    fn run(&mut self, task_id: &TaskId, job: JobRequest) -> TaskResult {
        let mut process = match self.process.take() {
            Some(process) => process,
            None => WorkerProcess::spawn(&self.config).map_err(|e| {
                DispatchError::TaskFailure(format!("failed to spawn worker process: {e}"))
            })?,
        };

        let request = WorkerRequest {
            id: task_id.to_string(),
            job: job.name,
            args: job.args,
        };
        match process.call(&request, self.config.job_timeout) {
            Ok(response) if response.id == request.id => {
                self.process = Some(process);
                response.outcome.into_result()
            }
            Ok(response) => {
                warn!(task_id = %task_id, answered = %response.id, "Worker answered the wrong request, replacing it");
                Err(DispatchError::TaskFailure(format!(
                    "worker process answered '{}' instead of '{}'",
                    response.id, request.id
                )))
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Worker process failed, replacing it");
                Err(DispatchError::TaskFailure(format!("worker process failed: {e}")))
            }
        }
    }
}

/// Bounded pool of worker processes for CPU-heavy jobs.
pub struct ProcessContext {
    pool: WorkerPool<JobRequest>,
}

impl ProcessContext {
    /// Spawn every worker process up front; a program that cannot start is a
    /// configuration error.
    pub(crate) fn start(
        config: ProcessPoolConfig,
        counters: Arc<Counters>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let config = Arc::new(config);
        let mut workers = Vec::with_capacity(config.pool.size);
        for _ in 0..config.pool.size {
            let process = WorkerProcess::spawn(&config).map_err(|e| {
                DispatchError::configuration(format!(
                    "cannot start worker process '{}': {e}",
                    config.program.display()
                ))
            })?;
            workers.push(ProcessWorker {
                config: Arc::clone(&config),
                process: Some(process),
            });
        }
        Ok(Self {
            pool: WorkerPool::start("process", config.pool.clone(), workers, counters)?,
        })
    }
}

impl ExecutionContext for ProcessContext {
    fn affinity(&self) -> Affinity {
        Affinity::Process
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        super::ensure_affinity(&task, Affinity::Process)?;
        let (id, affinity, payload) = task.into_parts();
        let job = match payload {
            Payload::Job(job) => job,
            other => {
                return Err(DispatchError::configuration(format!(
                    "{} payload cannot cross a process boundary",
                    other.kind()
                )));
            }
        };

        let cell = TaskCell::new(id);
        let (tx, rx) = oneshot::channel();
        self.pool.enqueue(Queued {
            cell: Arc::clone(&cell),
            job,
            completion: Completion::Reply(tx),
        })?;
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
    use crate::config::PoolConfig;

    #[test]
    fn test_missing_program_is_configuration_error() {
        let config = ProcessPoolConfig::new("/definitely/not/a/taskroute-worker")
            .pool(PoolConfig::new(1));
        let err = ProcessContext::start(config, Arc::new(Counters::default()))
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("cannot start")));
    }
}
