//! Persistence ports for playbooks and executions.
//!
//! The engine issues reads and writes through these narrow traits; the
//! infrastructure layer (`maestro-infra`) implements them with SQLite, and
//! `memory` provides in-process implementations for tests and embedders.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use maestro_types::error::RepositoryError;
use maestro_types::execution::{Execution, StepLogEntry};
use maestro_types::playbook::Playbook;
use uuid::Uuid;

pub mod memory;

// ---------------------------------------------------------------------------
// PlaybookRepository
// ---------------------------------------------------------------------------

/// Storage port for playbook definitions.
///
/// Definitions are immutable from the engine's perspective; `save_playbook`
/// is the explicit update operation that stores a new version.
pub trait PlaybookRepository: Send + Sync {
    /// Insert or update a playbook. Updates bump the stored version; the
    /// stored version is returned.
    fn save_playbook(
        &self,
        playbook: &Playbook,
    ) -> impl std::future::Future<Output = Result<u32, RepositoryError>> + Send;

    /// Get a playbook by ID.
    fn get_playbook(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Playbook>, RepositoryError>> + Send;

    /// List playbooks, optionally filtered by owner.
    fn list_playbooks(
        &self,
        owner_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<Playbook>, RepositoryError>> + Send;

    /// Delete a playbook by ID. Returns `true` if it existed.
    fn delete_playbook(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// ExecutionRepository
// ---------------------------------------------------------------------------

/// Storage port for execution records and their step logs.
pub trait ExecutionRepository: Send + Sync {
    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist the current state of an execution (no log entry).
    fn save_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load an execution by ID.
    fn load_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Persist an execution state change together with an appended step log
    /// entry, atomically: no observer sees one without the other.
    fn record_transition(
        &self,
        execution: &Execution,
        entry: &StepLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All step log entries for an execution, in dispatch order.
    fn list_step_history(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepLogEntry>, RepositoryError>> + Send;

    /// Executions left in `Running` status (a previous process died
    /// mid-drive).
    fn list_interrupted(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;
}
