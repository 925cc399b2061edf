//! Error taxonomy for the Maestro engine.
//!
//! Three families:
//! - `EngineError`: rejected synchronously to the caller of a public engine
//!   operation, with no state change.
//! - `StepFault`: step-level faults caught by the state machine and resolved
//!   through the step's error policy. They never escape to the caller as
//!   errors; exhausted policies turn into a `Failed` execution with a
//!   recorded reason.
//! - `RepositoryError`: the storage port's error type, surfaced to callers
//!   as `EngineError::Storage`.

use thiserror::Error;

/// Errors returned directly by public engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input to `start` (missing/mistyped initial inputs, structural
    /// playbook problems).
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not valid in the execution's current status. Has no side
    /// effect.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Playbook or execution not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is neither the owner nor an admin.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Persistence failure. The in-flight transition is not committed.
    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Step-level faults resolved via the step's error policy.
#[derive(Debug, Clone, Error)]
pub enum StepFault {
    /// Unresolved `{{var}}` reference, malformed condition expression, or a
    /// missing input variable.
    #[error("template error: {0}")]
    Template(String),

    /// The LLM collaborator failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// The budget collaborator denied the step. Never retried, regardless
    /// of policy.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Output extraction failed (no regex match, bad JSON, missing path).
    #[error("extraction error: {0}")]
    Extraction(String),
}

impl StepFault {
    /// Whether retry policy applies to this fault. Budget denials are a
    /// hard stop (fallback is still honored).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepFault::BudgetExceeded(_))
    }
}

/// Errors from repository operations (trait definitions live in
/// `maestro-core`, implementations in `maestro-infra`).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Validation("missing required input 'doc'".to_string());
        assert!(err.to_string().contains("missing required input"));

        let err = EngineError::InvalidState("execution is completed".to_string());
        assert!(err.to_string().starts_with("invalid state"));
    }

    #[test]
    fn test_step_fault_retryability() {
        assert!(StepFault::Provider("timeout".to_string()).is_retryable());
        assert!(StepFault::Template("no such var".to_string()).is_retryable());
        assert!(StepFault::Extraction("no match".to_string()).is_retryable());
        assert!(!StepFault::BudgetExceeded("cap reached".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_error_from_repository_error() {
        let err: EngineError = RepositoryError::Query("syntax error".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(err.to_string().contains("syntax error"));
    }
}
