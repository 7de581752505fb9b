//! Dispatcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// What a saturated pool does with a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Block the submitting thread until a slot frees.
    #[default]
    Block,
    /// Fail immediately with `ResourceExhausted`.
    Reject,
}

/// Sizing for a bounded pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers, fixed at startup.
    pub size: usize,
    /// Tasks allowed to wait beyond the busy workers (0 = no queue).
    pub queue_depth: usize,
    pub saturation: SaturationPolicy,
}

impl PoolConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn saturation(mut self, policy: SaturationPolicy) -> Self {
        self.saturation = policy;
        self
    }

    /// Maximum number of tasks admitted at once (running + queued).
    pub fn capacity(&self) -> usize {
        self.size + self.queue_depth
    }

    pub(crate) fn validate(&self, pool: &str) -> Result<(), DispatchError> {
        if self.size == 0 {
            return Err(DispatchError::configuration(format!(
                "{pool} pool size must be at least 1"
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: num_cpus::get().max(1) * 2,
            queue_depth: 64,
            saturation: SaturationPolicy::Block,
        }
    }
}

/// Process pool: a pool plus the worker program each slot runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPoolConfig {
    pub pool: PoolConfig,
    /// Executable speaking the JSON-lines worker protocol on stdin/stdout.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Longest a single job may run before its worker is killed and
    /// replaced. `None` waits indefinitely, and so does shutdown.
    #[serde(default)]
    pub job_timeout: Option<Duration>,
}

impl ProcessPoolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            pool: PoolConfig::new(num_cpus::get().max(1)),
            program: program.into(),
            args: Vec::new(),
            job_timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DispatchError> {
        self.pool.validate("process")?;
        if self.job_timeout == Some(Duration::ZERO) {
            return Err(DispatchError::configuration(
                "process job timeout must be greater than zero",
            ));
        }
        if self.program.as_os_str().is_empty() {
            return Err(DispatchError::configuration(
                "process pool needs a worker program",
            ));
        }
        Ok(())
    }
}

/// Full dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Shared by `Thread` and `Background` tasks.
    pub thread_pool: PoolConfig,
    /// `None` disables `Process` affinity.
    pub process_pool: Option<ProcessPoolConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_pool: PoolConfig::default(),
            process_pool: None,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.thread_pool.validate("thread")?;
        if let Some(process_pool) = &self.process_pool {
            process_pool.validate()?;
        }
        Ok(())
    }
}
