//! Task dispatcher. Routes each task to the execution context its affinity names.
//!
//! `Dispatcher` owns one context per affinity:
//! - `Cooperative` → [`CooperativeContext`] on the runtime the dispatcher was built in
//! - `Thread` → [`ThreadContext`]
//! - `Background` → [`BackgroundContext`], sharing the thread pool
//! - `Process` → [`ProcessContext`], only when a process pool is configured

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::affinity::Affinity;
use crate::config::{DispatcherConfig, PoolConfig, ProcessPoolConfig};
use crate::context::{
    BackgroundContext, BackgroundReport, CooperativeContext, ExecutionContext, ProcessContext,
    ThreadContext,
};
use crate::error::DispatchError;
use crate::handle::TaskHandle;
use crate::stats::{Counters, DispatcherStats};
use crate::task::{Payload, Task};

struct Inner {
    config: DispatcherConfig,
    counters: Arc<Counters>,
    cooperative: CooperativeContext,
    threads: Arc<ThreadContext>,
    background: BackgroundContext,
    processes: Option<ProcessContext>,
    shut_down: AtomicBool,
}

/// Routes tasks to execution contexts. Cheap to clone; clones share pools.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Build with `config` on the current tokio runtime.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        DispatcherBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Submit `payload` with the given affinity.
    ///
    /// Fails with `Configuration` when the payload cannot run under that
    /// affinity or the affinity's context is not configured.
    pub fn submit_payload(
        &self,
        payload: Payload,
        affinity: Affinity,
    ) -> Result<TaskHandle, DispatchError> {
        self.submit(Task::new(affinity, payload)?)
    }

    /// Submit a task to the context its affinity names.
    pub fn submit(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }
        let affinity = task.affinity();
        let task_id = task.id().clone();
        let context = self.context(affinity)?;

        match context.submit(task) {
            Ok(handle) => {
                self.inner.counters.record_submitted();
                debug!(task_id = %task_id, affinity = %affinity, "Task submitted");
                Ok(handle)
            }
            Err(e) => {
                if let DispatchError::ResourceExhausted { .. } = e {
                    self.inner.counters.record_rejected();
                    warn!(task_id = %task_id, affinity = %affinity, error = %e, "Task rejected");
                }
                Err(e)
            }
        }
    }

    /// The context serving `affinity`.
    pub fn context(&self, affinity: Affinity) -> Result<&dyn ExecutionContext, DispatchError> {
        match affinity {
            Affinity::Cooperative => Ok(&self.inner.cooperative),
            Affinity::Thread => Ok(self.inner.threads.as_ref()),
            Affinity::Background => Ok(&self.inner.background),
            Affinity::Process => self
                .inner
                .processes
                .as_ref()
                .map(|p| p as &dyn ExecutionContext)
                .ok_or_else(|| DispatchError::configuration("process pool is not configured")),
        }
    }

    pub fn supports(&self, affinity: Affinity) -> bool {
        self.context(affinity).is_ok()
    }

    pub fn stats(&self) -> DispatcherStats {
        let thread_pool = self
            .inner
            .threads
            .pool_stats()
            .unwrap_or_else(|| crate::stats::PoolStats {
                size: self.inner.config.thread_pool.size,
                capacity: self.inner.config.thread_pool.capacity(),
                in_flight: 0,
            });
        let process_pool = self
            .inner
            .processes
            .as_ref()
            .and_then(|p| p.pool_stats());
        DispatcherStats::from_counters(
            &self.inner.counters,
            self.inner.cooperative.in_flight(),
            thread_pool,
            process_pool,
        )
    }

    /// Stop accepting tasks, drain queued work and stop pool threads and
    /// worker processes. Blocks until the pools are idle.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.threads.shutdown();
        if let Some(processes) = &self.inner.processes {
            processes.shutdown();
        }
        info!("Dispatcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    runtime: Option<Handle>,
    reports: Option<mpsc::Sender<BackgroundReport>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            runtime: None,
            reports: None,
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn thread_pool(mut self, pool: PoolConfig) -> Self {
        self.config.thread_pool = pool;
        self
    }

    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.config.thread_pool.size = size;
        self
    }

    pub fn process_pool(mut self, process_pool: ProcessPoolConfig) -> Self {
        self.config.process_pool = Some(process_pool);
        self
    }

    /// Run cooperative tasks on this runtime instead of the current one.
    /// It must be a current-thread runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Receive the outcome of every background task on this channel.
    ///
    /// Reports that find the channel full are logged and dropped.
    pub fn background_reports(mut self, tx: mpsc::Sender<BackgroundReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        self.config.validate()?;
        let counters = Arc::new(Counters::default());

        let cooperative = match self.runtime {
            Some(runtime) => CooperativeContext::new(runtime, Arc::clone(&counters))?,
            None => CooperativeContext::current(Arc::clone(&counters))?,
        };
        let threads = Arc::new(ThreadContext::start(
            self.config.thread_pool.clone(),
            Arc::clone(&counters),
        )?);
        let background = BackgroundContext::new(Arc::clone(&threads), self.reports);
        let processes = match &self.config.process_pool {
            Some(process_pool) => Some(ProcessContext::start(
                process_pool.clone(),
                Arc::clone(&counters),
            )?),
            None => None,
        };

        info!(
            threads = self.config.thread_pool.size,
            processes = self.config.process_pool.as_ref().map(|p| p.pool.size).unwrap_or(0),
            "Dispatcher started"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                config: self.config,
                counters,
                cooperative,
                threads,
                background,
                processes,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small() -> Dispatcher {
        Dispatcher::builder().thread_pool_size(2).build().unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_affinity() {
        let dispatcher = small();
        let coop = dispatcher
            .submit_payload(Payload::future(|| async { Ok(json!("coop")) }), Affinity::Cooperative)
            .unwrap();
        let thread = dispatcher
            .submit_payload(Payload::blocking(|| Ok(json!("thread"))), Affinity::Thread)
            .unwrap();
        assert_eq!(coop.affinity(), Affinity::Cooperative);
        assert_eq!(thread.affinity(), Affinity::Thread);
        assert_eq!(coop.await.unwrap(), json!("coop"));
        assert_eq!(thread.await.unwrap(), json!("thread"));

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.thread_pool.size, 2);
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_process_without_pool_is_configuration_error() {
        let dispatcher = small();
        assert!(!dispatcher.supports(Affinity::Process));
        let err = dispatcher
            .submit(Task::process("echo", json!({})))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("process pool")));
        assert!(dispatcher.stats().process_pool.is_none());
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_mismatched_payload_fails_synchronously() {
        let dispatcher = small();
        let err = dispatcher
            .submit_payload(Payload::job("echo", json!(null)), Affinity::Thread)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
        assert_eq!(dispatcher.stats().submitted, 0);
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let dispatcher = small();
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        let err = dispatcher.submit(Task::thread(|| Ok(json!(1)))).unwrap_err();
        assert_eq!(err, DispatchError::ShutDown);
    }

    #[test]
    fn test_build_outside_runtime_needs_explicit_runtime() {
        let err = Dispatcher::builder().thread_pool_size(1).build().unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatcher = Dispatcher::builder()
            .thread_pool_size(1)
            .runtime(runtime.handle().clone())
            .build()
            .unwrap();
        let handle = dispatcher
            .submit(Task::cooperative(|| async { Ok(json!(7)) }))
            .unwrap();
        assert_eq!(runtime.block_on(handle.join()).unwrap(), json!(7));
        dispatcher.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime_is_rejected() {
        let err = Dispatcher::builder().thread_pool_size(1).build().unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("current-thread")));
    }

    #[test]
    fn test_explicit_multi_thread_runtime_is_rejected() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let err = Dispatcher::builder()
            .thread_pool_size(1)
            .runtime(runtime.handle().clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Dispatcher::builder().thread_pool_size(0).build().unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }
}
