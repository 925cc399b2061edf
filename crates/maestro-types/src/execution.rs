//! Execution tracking types for Maestro.
//!
//! An `Execution` is one stateful run of a playbook for a specific user.
//! It is created `Pending`, driven through `Running` (with an optional
//! `PausedForReview` sub-cycle), and ends in exactly one terminal state.
//! `StepLogEntry` records form the append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a playbook. Mutated exclusively by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// The playbook being executed.
    pub playbook_id: Uuid,
    /// Playbook version captured at start (definitions are immutable
    /// mid-execution).
    pub playbook_version: u32,
    /// The user who started the run.
    pub user_id: Uuid,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// The step the engine will dispatch next (or is paused at). `None`
    /// only once the execution is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Variable store snapshot (JSON form, see `maestro-core`'s
    /// `VariableStore::to_json`).
    pub variables: Value,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail, set when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl Execution {
    /// Whether the execution has reached a terminal state.
    ///
    /// Terminal executions accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Lifecycle status of an execution.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}` with
/// `Running <-> PausedForReview` as a sub-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    PausedForReview,
    Completed,
    Failed,
    Cancelled,
}

/// Where and why an execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// The step at which failure occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Human-readable failure reason.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Step log entries
// ---------------------------------------------------------------------------

/// One entry in an execution's append-only audit trail.
///
/// Entries are immutable once written. Retries append new entries, they
/// never replace prior ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogEntry {
    /// UUIDv7 entry ID.
    pub id: Uuid,
    /// Parent execution ID.
    pub execution_id: Uuid,
    /// Dispatch sequence number (1-based, strictly increasing per
    /// execution).
    pub seq: u32,
    /// Step ID matching `StepDefinition.id`.
    pub step_id: String,
    /// Attempt number (1-based, increments on retry).
    pub attempt: u32,
    /// Outcome of this attempt.
    pub status: StepLogStatus,
    /// Snapshot of the variable store at dispatch (size-capped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_snapshot: Option<Value>,
    /// Snapshot of the step's output (size-capped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_snapshot: Option<Value>,
    /// Whether a snapshot was truncated to fit the byte cap.
    #[serde(default)]
    pub truncated: bool,
    /// Error message when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
}

/// Outcome of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLogStatus {
    Success,
    Error,
    /// The attempt's result was not applied (e.g. it arrived after the
    /// execution was cancelled).
    Skipped,
}

// ---------------------------------------------------------------------------
// Review decisions
// ---------------------------------------------------------------------------

/// The decision submitted for a paused review step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    /// Stable string form stored in audit entries and variables.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_status_serde() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::PausedForReview,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: ExecutionStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::PausedForReview).unwrap(),
            "\"paused_for_review\""
        );
    }

    #[test]
    fn test_terminal_states() {
        let mut execution = Execution {
            id: Uuid::now_v7(),
            playbook_id: Uuid::now_v7(),
            playbook_version: 1,
            user_id: Uuid::now_v7(),
            status: ExecutionStatus::Running,
            current_step: Some("s1".to_string()),
            variables: json!([]),
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        };
        assert!(!execution.is_terminal());

        execution.status = ExecutionStatus::PausedForReview;
        assert!(!execution.is_terminal());

        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            execution.status = status;
            assert!(execution.is_terminal());
        }
    }

    #[test]
    fn test_execution_json_roundtrip() {
        let execution = Execution {
            id: Uuid::now_v7(),
            playbook_id: Uuid::now_v7(),
            playbook_version: 3,
            user_id: Uuid::now_v7(),
            status: ExecutionStatus::Failed,
            current_step: Some("summarize".to_string()),
            variables: json!([["doc", "hello"]]),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            failure: Some(FailureInfo {
                step_id: Some("summarize".to_string()),
                reason: "provider error: timeout".to_string(),
            }),
        };
        let json_str = serde_json::to_string(&execution).unwrap();
        let parsed: Execution = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.status, ExecutionStatus::Failed);
        assert_eq!(parsed.playbook_version, 3);
        assert_eq!(
            parsed.failure.unwrap().reason,
            "provider error: timeout"
        );
    }

    #[test]
    fn test_step_log_entry_json_roundtrip() {
        let entry = StepLogEntry {
            id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            seq: 2,
            step_id: "summarize".to_string(),
            attempt: 1,
            status: StepLogStatus::Success,
            input_snapshot: Some(json!([["doc", "hello"]])),
            output_snapshot: Some(json!("a summary")),
            truncated: false,
            error_detail: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        let json_str = serde_json::to_string(&entry).unwrap();
        let parsed: StepLogEntry = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.seq, 2);
        assert_eq!(parsed.status, StepLogStatus::Success);
        assert_eq!(parsed.attempt, 1);
    }

    #[test]
    fn test_review_decision_as_str() {
        assert_eq!(ReviewDecision::Approve.as_str(), "approve");
        assert_eq!(ReviewDecision::Reject.as_str(), "reject");
        let parsed: ReviewDecision = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(parsed, ReviewDecision::Reject);
    }
}
