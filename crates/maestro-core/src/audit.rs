//! Audit trail entry construction with snapshot size capping.
//!
//! `AuditRecorder` builds the immutable `StepLogEntry` values the engine
//! persists. Large input/output snapshots are truncated over the configured
//! byte limit; the loss is marked (`truncated: true`), never silent.

use chrono::{DateTime, Utc};
use maestro_types::execution::{StepLogEntry, StepLogStatus};
use serde_json::{Value, json};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AuditRecorder
// ---------------------------------------------------------------------------

/// Builds audit entries for one execution.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    execution_id: Uuid,
    snapshot_limit_bytes: usize,
}

impl AuditRecorder {
    /// Create a recorder for an execution with the given snapshot cap.
    pub fn new(execution_id: Uuid, snapshot_limit_bytes: usize) -> Self {
        Self {
            execution_id,
            snapshot_limit_bytes,
        }
    }

    /// Entry for a successful step attempt.
    pub fn success(
        &self,
        seq: u32,
        step_id: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        input: &Value,
        output: &Value,
    ) -> StepLogEntry {
        let (input_snapshot, input_truncated) = self.snapshot(input);
        let (output_snapshot, output_truncated) = self.snapshot(output);
        self.entry(
            seq,
            step_id,
            attempt,
            StepLogStatus::Success,
            started_at,
            Some(input_snapshot),
            Some(output_snapshot),
            input_truncated || output_truncated,
            None,
        )
    }

    /// Entry for a failed step attempt.
    pub fn error(
        &self,
        seq: u32,
        step_id: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        input: &Value,
        detail: &str,
    ) -> StepLogEntry {
        let (input_snapshot, truncated) = self.snapshot(input);
        self.entry(
            seq,
            step_id,
            attempt,
            StepLogStatus::Error,
            started_at,
            Some(input_snapshot),
            None,
            truncated,
            Some(detail.to_string()),
        )
    }

    /// Entry for a step attempt whose result was not applied (e.g. it
    /// arrived after cancellation).
    pub fn skipped(
        &self,
        seq: u32,
        step_id: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        detail: &str,
    ) -> StepLogEntry {
        self.entry(
            seq,
            step_id,
            attempt,
            StepLogStatus::Skipped,
            started_at,
            None,
            None,
            false,
            Some(detail.to_string()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn entry(
        &self,
        seq: u32,
        step_id: &str,
        attempt: u32,
        status: StepLogStatus,
        started_at: DateTime<Utc>,
        input_snapshot: Option<Value>,
        output_snapshot: Option<Value>,
        truncated: bool,
        error_detail: Option<String>,
    ) -> StepLogEntry {
        StepLogEntry {
            id: Uuid::now_v7(),
            execution_id: self.execution_id,
            seq,
            step_id: step_id.to_string(),
            attempt,
            status,
            input_snapshot,
            output_snapshot,
            truncated,
            error_detail,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Cap a snapshot at the byte limit.
    ///
    /// Oversized values are replaced by a marker object carrying a prefix
    /// of the serialized form and the original size.
    fn snapshot(&self, value: &Value) -> (Value, bool) {
        let serialized = serde_json::to_string(value).unwrap_or_default();
        if serialized.len() <= self.snapshot_limit_bytes {
            return (value.clone(), false);
        }

        tracing::warn!(
            execution_id = %self.execution_id,
            size = serialized.len(),
            limit = self.snapshot_limit_bytes,
            "snapshot exceeds byte limit, truncating"
        );

        // Cut on a char boundary at or below the limit.
        let mut cut = self.snapshot_limit_bytes.min(serialized.len());
        while cut > 0 && !serialized.is_char_boundary(cut) {
            cut -= 1;
        }
        (
            json!({
                "_truncated": true,
                "_original_size": serialized.len(),
                "_prefix": &serialized[..cut],
            }),
            true,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
