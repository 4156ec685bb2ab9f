//! Error taxonomy for the orchestration engine.
//!
//! Only configuration errors are surfaced synchronously at submission;
//! everything else is captured inside the returned result or logged.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the orchestration engine
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Request is invalid and was rejected before any task executed
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A task attempt failed (recoverable per retry policy)
    #[error("Task '{task_id}' failed: {reason}")]
    TaskFailure { task_id: String, reason: String },

    /// A task attempt did not return within its timeout
    #[error("Task '{task_id}' timed out after {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },

    /// The review gate rejected the candidate response and
    /// `reject_action = error` makes that the terminal outcome
    #[error("Review rejected orchestration {orchestration_id}: {feedback}")]
    ReviewRejected {
        orchestration_id: uuid::Uuid,
        feedback: String,
    },

    /// The orchestration was cancelled before completion
    #[error("Orchestration {orchestration_id} was cancelled")]
    Cancelled { orchestration_id: uuid::Uuid },

    /// Persistence write/read failed (degrades observability only)
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

/// Request validation errors, rejected synchronously at submission
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Cyclic dependency among tasks: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Dependency map references unknown task '{task_id}'")]
    UnknownTask { task_id: String },

    #[error("Task '{task_id}' names unknown executor '{executor}'")]
    UnknownExecutor { task_id: String, executor: String },

    #[error("Duplicate task id '{task_id}' in request")]
    DuplicateTask { task_id: String },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_members() {
        let err = ConfigurationError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency among tasks: a -> b -> a"
        );
    }

    #[test]
    fn test_timeout_error_display() {
        let err = OrchestrationError::TaskTimeout {
            task_id: "fetch".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("fetch"));
        assert!(err.to_string().contains("5s"));
    }
}
