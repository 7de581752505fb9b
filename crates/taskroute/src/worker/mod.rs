//! Worker side of the process pool.
//!
//! A worker process reads [`WorkerRequest`]s from stdin, runs the named job
//! from its [`JobRegistry`] and writes one [`WorkerResponse`] per request to
//! stdout. Failing or panicking jobs produce an error outcome and the worker
//! keeps serving.

pub mod jobs;
pub mod protocol;

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::panic_message;
use crate::task::JobRequest;

pub use protocol::{JobOutcome, WorkerRequest, WorkerResponse};

/// A job body. Arguments and result are plain JSON.
pub type JobFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Name -> job lookup table for a worker process.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobFn>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo`, `sleep`, `fail`, `panic`, `exit` and `name_length`.
    pub fn with_builtin_jobs() -> Self {
        let mut registry = Self::new();
        jobs::register(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, job: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.jobs.insert(name.into(), Arc::new(job));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a job, turning unknown names and panics into error messages.
    pub fn run(&self, request: &JobRequest) -> Result<Value, String> {
        let job = self
            .jobs
            .get(&request.name)
            .ok_or_else(|| format!("unknown job '{}'", request.name))?;
        let args = request.args.clone();
        catch_unwind(AssertUnwindSafe(|| (**job)(args)))
            .unwrap_or_else(|panic| Err(panic_message(panic.as_ref())))
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

/// Answer requests from `reader` on `writer` until EOF.
///
/// Returns the number of requests answered.
pub fn serve<R: BufRead, W: Write>(
    registry: &JobRegistry,
    reader: R,
    mut writer: W,
) -> io::Result<usize> {
    let mut served = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                debug!(task_id = %request.id, job = %request.job, "Worker running job");
                let outcome = registry.run(&JobRequest::new(request.job, request.args));
                WorkerResponse {
                    id: request.id,
                    outcome: outcome.into(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Malformed worker request");
                WorkerResponse {
                    id: String::new(),
                    outcome: JobOutcome::Error(format!("malformed request: {e}")),
                }
            }
        };

        serde_json::to_writer(&mut writer, &response).map_err(io::Error::other)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        served += 1;
    }
    Ok(served)
}

/// Serve the process's own stdin/stdout. Entry point for worker binaries.
pub fn run_stdio(registry: &JobRegistry) -> io::Result<usize> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(registry, stdin.lock(), stdout.lock())
}
