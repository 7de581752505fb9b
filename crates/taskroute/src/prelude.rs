//! Convenient re-exports for task dispatch.

pub use crate::affinity::Affinity;
pub use crate::config::{DispatcherConfig, PoolConfig, ProcessPoolConfig, SaturationPolicy};
pub use crate::context::{BackgroundReport, ExecutionContext};
pub use crate::dispatcher::{Dispatcher, DispatcherBuilder};
pub use crate::error::DispatchError;
pub use crate::handle::TaskHandle;
pub use crate::state_machine::TaskState;
pub use crate::task::{Payload, Task, TaskId};
pub use crate::timing::{TaskGroup, timed};
