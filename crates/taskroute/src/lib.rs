//! # taskroute
//!
//! **Route each unit of work to the execution context it belongs in.**
//!
//! Work declares an [`Affinity`] when it is built and the [`Dispatcher`]
//! places it accordingly:
//!
//! - **Cooperative**: async work on the single-threaded scheduler. Must not block.
//! - **Thread**: blocking work on a bounded pool of OS threads.
//! - **Process**: serializable jobs on a bounded pool of worker processes.
//! - **Background**: thread pool work acknowledged immediately; the outcome
//!   goes to logs and an optional report channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskroute::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), DispatchError> {
//! let dispatcher = Dispatcher::builder().thread_pool_size(4).build()?;
//!
//! let read = dispatcher.submit(Task::cooperative(|| async {
//!     Ok(json!("done"))
//! }))?;
//! let calc = dispatcher.submit(Task::thread(|| {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//!     Ok(json!(42))
//! }))?;
//!
//! let (contents, calculation) = tokio::join!(read.join(), calc.join());
//! assert_eq!(contents?, json!("done"));
//! assert_eq!(calculation?, json!(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`Task` / `Payload`**: work bound to its affinity, immutable once built
//! - **`ExecutionContext`**: one implementation per affinity
//! - **`TaskHandle`**: state (`Pending → Running → Completed | Failed`, or
//!   `Pending → Cancelled`) plus the awaitable result
//! - **`TaskGroup`**: elapsed time from first submission to last completion
//! - **`worker`**: the JSON-lines protocol and job registry run by worker processes

pub mod affinity;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod prelude;
pub mod state_machine;
pub mod stats;
pub mod task;
pub mod timing;
pub mod worker;

pub use affinity::Affinity;
pub use config::{DispatcherConfig, PoolConfig, ProcessPoolConfig, SaturationPolicy};
pub use context::{BackgroundReport, ExecutionContext};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{BoxError, DispatchError};
pub use handle::{TaskHandle, TaskResult};
pub use state_machine::{TaskState, is_terminal, validate_transition};
pub use stats::{DispatcherStats, PoolStats};
pub use task::{JobRequest, Payload, PayloadResult, Task, TaskBuilder, TaskId, TaskOutput};
pub use timing::{GroupReport, TaskGroup, timed};
pub use worker::JobRegistry;

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
