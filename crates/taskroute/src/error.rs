//! Unified error type for dispatch operations.

use crate::state_machine::TaskState;

/// Error type returned by payloads. Anything boxable works with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the dispatcher, its execution contexts and task handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Invalid affinity, payload/affinity mismatch or invalid pool settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The target pool and its queue are full and the pool rejects new work.
    #[error("Resource exhausted: {pool} pool at capacity ({capacity})")]
    ResourceExhausted { pool: &'static str, capacity: usize },

    /// The payload returned an error or panicked.
    #[error("Task failed: {0}")]
    TaskFailure(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Dispatcher is shut down")]
    ShutDown,

    #[error("Invalid state transition: {current:?} -> {requested:?}")]
    InvalidTransition {
        current: TaskState,
        requested: TaskState,
    },

    #[error("Task is in terminal state: {0:?}")]
    TerminalState(TaskState),
}

impl DispatchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        DispatchError::Configuration(message.into())
    }

    pub fn task_failure(message: impl Into<String>) -> Self {
        DispatchError::TaskFailure(message.into())
    }

    /// Whether retrying the same submission later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::ResourceExhausted { .. })
    }
}

/// Turn a caught panic payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::ResourceExhausted {
            pool: "thread",
            capacity: 4,
        };
        assert_eq!(
            err.to_string(),
            "Resource exhausted: thread pool at capacity (4)"
        );
        assert!(err.is_transient());
        assert!(!DispatchError::configuration("bad").is_transient());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "panicked: boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "panicked: bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "panicked");
    }
}
