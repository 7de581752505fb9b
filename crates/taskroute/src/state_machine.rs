//! Task state machine enforcement.
//!
//! Handles move forward only:
//!
//! ```text
//! Pending -> Running | Cancelled
//! Running -> Completed | Failed
//! Completed/Failed/Cancelled -> ERROR (terminal, no further transitions)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by a context, not yet picked up.
    Pending,
    Running,
    Completed,
    Failed,
    /// Cancelled while still pending.
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a task state transition.
///
/// Returns `Ok(())` if the transition is valid, or `Err(DispatchError)` if not.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), DispatchError> {
    match from {
        TaskState::Pending => match to {
            TaskState::Running | TaskState::Cancelled => Ok(()),
            TaskState::Pending | TaskState::Completed | TaskState::Failed => {
                Err(DispatchError::InvalidTransition {
                    current: from,
                    requested: to,
                })
            }
        },
        TaskState::Running => match to {
            TaskState::Completed | TaskState::Failed => Ok(()),
            TaskState::Pending | TaskState::Running | TaskState::Cancelled => {
                Err(DispatchError::InvalidTransition {
                    current: from,
                    requested: to,
                })
            }
        },
        TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
            Err(DispatchError::TerminalState(from))
        }
    }
}

/// Returns `true` if the state is terminal (no further transitions allowed).
pub fn is_terminal(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed | TaskState::Failed | TaskState::Cancelled
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_pending_transitions() {
        assert!(validate_transition(TaskState::Pending, TaskState::Running).is_ok());
        assert!(validate_transition(TaskState::Pending, TaskState::Cancelled).is_ok());
    }

    #[test]
    fn test_pending_cannot_skip_running() {
        assert!(validate_transition(TaskState::Pending, TaskState::Completed).is_err());
        assert!(validate_transition(TaskState::Pending, TaskState::Failed).is_err());
        assert!(validate_transition(TaskState::Pending, TaskState::Pending).is_err());
    }

    #[test]
    fn test_valid_running_transitions() {
        assert!(validate_transition(TaskState::Running, TaskState::Completed).is_ok());
        assert!(validate_transition(TaskState::Running, TaskState::Failed).is_ok());
    }

    #[test]
    fn test_running_is_not_cancellable() {
        let err = validate_transition(TaskState::Running, TaskState::Cancelled).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                current: TaskState::Running,
                requested: TaskState::Cancelled,
            }
        ));
        assert!(validate_transition(TaskState::Running, TaskState::Pending).is_err());
    }

    #[test]
    fn test_terminal_states_reject_all_transitions() {
        for terminal in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            for target in [
                TaskState::Pending,
                TaskState::Running,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ] {
                match validate_transition(terminal, target) {
                    Err(DispatchError::TerminalState(s)) => assert_eq!(s, terminal),
                    other => panic!("Expected TerminalState for {terminal:?} -> {target:?}, got: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_is_terminal() {
        assert!(!is_terminal(TaskState::Pending));
        assert!(!is_terminal(TaskState::Running));
        assert!(is_terminal(TaskState::Completed));
        assert!(is_terminal(TaskState::Failed));
        assert!(is_terminal(TaskState::Cancelled));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&TaskState::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(TaskState::Running.to_string(), "running");
    }
}
