//! SQLite execution repository.
//!
//! Executions live in columns (status, current step, variable snapshot,
//! failure detail); step log entries are append-only rows ordered by a
//! persisted `seq` column. `record_transition` writes the execution update
//! and the log insert inside one transaction, so no observer sees one
//! without the other.

use chrono::{DateTime, Utc};
use maestro_core::repository::ExecutionRepository;
use maestro_types::error::RepositoryError;
use maestro_types::execution::{
    Execution, ExecutionStatus, FailureInfo, StepLogEntry, StepLogStatus,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    playbook_id: String,
    playbook_version: i64,
    user_id: String,
    status: String,
    current_step: Option<String>,
    variables: String,
    failure_step: Option<String>,
    failure_reason: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            playbook_id: row.try_get("playbook_id")?,
            playbook_version: row.try_get("playbook_version")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            variables: row.try_get("variables")?,
            failure_step: row.try_get("failure_step")?,
            failure_reason: row.try_get("failure_reason")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid execution status: {}", self.status)),
            )?;

        let variables: serde_json::Value = serde_json::from_str(&self.variables)
            .map_err(|e| RepositoryError::Query(format!("invalid variables JSON: {e}")))?;

        let failure = self.failure_reason.map(|reason| FailureInfo {
            step_id: self.failure_step,
            reason,
        });

        Ok(Execution {
            id: parse_uuid(&self.id)?,
            playbook_id: parse_uuid(&self.playbook_id)?,
            playbook_version: self.playbook_version as u32,
            user_id: parse_uuid(&self.user_id)?,
            status,
            current_step: self.current_step,
            variables,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            failure,
        })
    }
}

struct StepRow {
    id: String,
    execution_id: String,
    seq: i64,
    step_id: String,
    attempt: i64,
    status: String,
    input_snapshot: Option<String>,
    output_snapshot: Option<String>,
    truncated: bool,
    error_detail: Option<String>,
    started_at: String,
    finished_at: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            seq: row.try_get("seq")?,
            step_id: row.try_get("step_id")?,
            attempt: row.try_get("attempt")?,
            status: row.try_get("status")?,
            input_snapshot: row.try_get("input_snapshot")?,
            output_snapshot: row.try_get("output_snapshot")?,
            truncated: row.try_get("truncated")?,
            error_detail: row.try_get("error_detail")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_entry(self) -> Result<StepLogEntry, RepositoryError> {
        let status: StepLogStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid step status: {}", self.status)),
            )?;

        let input_snapshot = self
            .input_snapshot
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid input snapshot: {e}")))
            })
            .transpose()?;
        let output_snapshot = self
            .output_snapshot
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output snapshot: {e}")))
            })
            .transpose()?;

        Ok(StepLogEntry {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            seq: self.seq as u32,
            step_id: self.step_id,
            attempt: self.attempt as u32,
            status,
            input_snapshot,
            output_snapshot,
            truncated: self.truncated,
            error_detail: self.error_detail,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_datetime(&self.finished_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn status_str(status: &ExecutionStatus) -> Result<String, RepositoryError> {
    serde_json::to_value(status)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("status did not serialize to string".to_string()))
}

fn step_status_str(status: &StepLogStatus) -> Result<String, RepositoryError> {
    serde_json::to_value(status)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("status did not serialize to string".to_string()))
}

fn execution_binds(
    execution: &Execution,
) -> Result<(String, String, Option<String>, Option<String>, Option<String>, Option<String>), RepositoryError>
{
    let status = status_str(&execution.status)?;
    let variables = serde_json::to_string(&execution.variables)
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let failure_step = execution
        .failure
        .as_ref()
        .and_then(|f| f.step_id.clone());
    let failure_reason = execution.failure.as_ref().map(|f| f.reason.clone());
    let completed_at = execution.completed_at.as_ref().map(|dt| dt.to_rfc3339());
    Ok((
        status,
        variables,
        execution.current_step.clone(),
        failure_step,
        failure_reason,
        completed_at,
    ))
}

/// Append one step log entry within the given executor (pool or transaction).
async fn insert_step_entry<'e, E>(executor: E, entry: &StepLogEntry) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let status = step_status_str(&entry.status)?;
    let input_snapshot = entry
        .input_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let output_snapshot = entry
        .output_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    sqlx::query(
        r#"INSERT INTO execution_steps
           (id, execution_id, seq, step_id, attempt, status, input_snapshot,
            output_snapshot, truncated, error_detail, started_at, finished_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(entry.id.to_string())
    .bind(entry.execution_id.to_string())
    .bind(entry.seq as i64)
    .bind(&entry.step_id)
    .bind(entry.attempt as i64)
    .bind(&status)
    .bind(&input_snapshot)
    .bind(&output_snapshot)
    .bind(entry.truncated)
    .bind(&entry.error_detail)
    .bind(entry.started_at.to_rfc3339())
    .bind(entry.finished_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;
    Ok(())
}

/// Update the mutable columns of an execution row.
async fn update_execution<'e, E>(executor: E, execution: &Execution) -> Result<u64, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let (status, variables, current_step, failure_step, failure_reason, completed_at) =
        execution_binds(execution)?;

    let result = sqlx::query(
        r#"UPDATE executions SET
             status = ?, current_step = ?, variables = ?,
             failure_step = ?, failure_reason = ?, completed_at = ?
           WHERE id = ?"#,
    )
    .bind(&status)
    .bind(&current_step)
    .bind(&variables)
    .bind(&failure_step)
    .bind(&failure_reason)
    .bind(&completed_at)
    .bind(execution.id.to_string())
    .execute(executor)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let (status, variables, current_step, failure_step, failure_reason, completed_at) =
            execution_binds(execution)?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, playbook_id, playbook_version, user_id, status, current_step,
                variables, failure_step, failure_reason, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.playbook_id.to_string())
        .bind(execution.playbook_version as i64)
        .bind(execution.user_id.to_string())
        .bind(&status)
        .bind(&current_step)
        .bind(&variables)
        .bind(&failure_step)
        .bind(&failure_reason)
        .bind(execution.started_at.to_rfc3339())
        .bind(&completed_at)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("execution {} already exists", execution.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let affected = update_execution(&self.pool.writer, execution).await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn load_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn record_transition(
        &self,
        execution: &Execution,
        entry: &StepLogEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let affected = update_execution(&mut *tx, execution).await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        insert_step_entry(&mut *tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            seq = entry.seq,
            step_id = entry.step_id.as_str(),
            "recorded transition"
        );
        Ok(())
    }

    async fn list_step_history(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_steps WHERE execution_id = ? ORDER BY seq ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            entries.push(r.into_entry()?);
        }
        Ok(entries)
    }

    async fn list_interrupted(&self) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = 'running'")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r =
                ExecutionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> (tempfile::TempDir, SqliteExecutionRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteExecutionRepository::new(pool))
    }

    fn sample_execution() -> Execution {
        Execution {
            id: Uuid::now_v7(),
            playbook_id: Uuid::now_v7(),
            playbook_version: 2,
            user_id: Uuid::now_v7(),
            status: ExecutionStatus::Running,
            current_step: Some("s1".to_string()),
            variables: json!([["doc", "hello"]]),
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        }
    }

    fn entry(execution_id: Uuid, seq: u32, status: StepLogStatus) -> StepLogEntry {
        StepLogEntry {
            id: Uuid::now_v7(),
            execution_id,
            seq,
            step_id: "s1".to_string(),
            attempt: 1,
            status,
            input_snapshot: Some(json!([["doc", "hello"]])),
            output_snapshot: Some(json!("out")),
            truncated: false,
            error_detail: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_load_roundtrip() {
        let (_dir, repo) = repo().await;
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let loaded = repo.load_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, execution.id);
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.playbook_version, 2);
        assert_eq!(loaded.current_step.as_deref(), Some("s1"));
        assert_eq!(loaded.variables, json!([["doc", "hello"]]));
        assert!(loaded.failure.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let (_dir, repo) = repo().await;
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();
        let err = repo.create_execution(&execution).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_updates_status_and_failure() {
        let (_dir, repo) = repo().await;
        let mut execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        execution.status = ExecutionStatus::Failed;
        execution.failure = Some(FailureInfo {
            step_id: Some("s1".to_string()),
            reason: "provider error: boom".to_string(),
        });
        execution.completed_at = Some(Utc::now());
        repo.save_execution(&execution).await.unwrap();

        let loaded = repo.load_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        let failure = loaded.failure.unwrap();
        assert_eq!(failure.step_id.as_deref(), Some("s1"));
        assert!(failure.reason.contains("boom"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_save_unknown_execution_is_not_found() {
        let (_dir, repo) = repo().await;
        let err = repo.save_execution(&sample_execution()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_record_transition_is_atomic_unit() {
        let (_dir, repo) = repo().await;
        let mut execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        execution.variables = json!([["doc", "hello"], ["out", "value"]]);
        execution.current_step = Some("s2".to_string());
        repo.record_transition(&execution, &entry(execution.id, 1, StepLogStatus::Success))
            .await
            .unwrap();

        let loaded = repo.load_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_step.as_deref(), Some("s2"));
        let history = repo.list_step_history(&execution.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].seq, 1);
    }

    #[tokio::test]
    async fn test_record_transition_unknown_execution_rolls_back() {
        let (_dir, repo) = repo().await;
        let execution = sample_execution();
        // Never created
        let err = repo
            .record_transition(&execution, &entry(execution.id, 1, StepLogStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
        let history = repo.list_step_history(&execution.id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_step_history_ordered_by_seq() {
        let (_dir, repo) = repo().await;
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        for seq in [1u32, 2, 3] {
            let status = if seq < 3 {
                StepLogStatus::Error
            } else {
                StepLogStatus::Success
            };
            repo.record_transition(&execution, &entry(execution.id, seq, status))
                .await
                .unwrap();
        }

        let history = repo.list_step_history(&execution.id).await.unwrap();
        assert_eq!(
            history.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(history[0].status, StepLogStatus::Error);
        assert_eq!(history[2].status, StepLogStatus::Success);
    }

    #[tokio::test]
    async fn test_duplicate_seq_rejected() {
        let (_dir, repo) = repo().await;
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        repo.record_transition(&execution, &entry(execution.id, 1, StepLogStatus::Success))
            .await
            .unwrap();
        let err = repo
            .record_transition(&execution, &entry(execution.id, 1, StepLogStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }

    #[tokio::test]
    async fn test_list_interrupted() {
        let (_dir, repo) = repo().await;
        let running = sample_execution();
        repo.create_execution(&running).await.unwrap();

        let mut done = sample_execution();
        done.status = ExecutionStatus::Completed;
        done.current_step = None;
        done.completed_at = Some(Utc::now());
        repo.create_execution(&done).await.unwrap();

        let interrupted = repo.list_interrupted().await.unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, running.id);
    }
}
