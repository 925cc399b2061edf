//! In-memory repository implementations.
//!
//! Backed by mutex-held maps. Used by engine tests and by embedders that
//! don't need durable storage. `record_transition` is atomic under the
//! single store mutex, matching the SQLite implementation's transaction
//! semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use maestro_types::error::RepositoryError;
use maestro_types::execution::{Execution, ExecutionStatus, StepLogEntry};
use maestro_types::llm::PromptTemplate;
use maestro_types::playbook::Playbook;
use uuid::Uuid;

use crate::llm::PromptStore;

use super::{ExecutionRepository, PlaybookRepository};

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    playbooks: HashMap<Uuid, Playbook>,
    executions: HashMap<Uuid, Execution>,
    step_logs: HashMap<Uuid, Vec<StepLogEntry>>,
}

/// In-memory implementation of both repository ports.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned mutex means a panicked test thread; propagate the data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PlaybookRepository for InMemoryStore {
    async fn save_playbook(&self, playbook: &Playbook) -> Result<u32, RepositoryError> {
        let mut inner = self.lock();
        let version = match inner.playbooks.get(&playbook.id) {
            Some(existing) => existing.version + 1,
            None => playbook.version.max(1),
        };
        let mut stored = playbook.clone();
        stored.version = version;
        inner.playbooks.insert(stored.id, stored);
        Ok(version)
    }

    async fn get_playbook(&self, id: &Uuid) -> Result<Option<Playbook>, RepositoryError> {
        Ok(self.lock().playbooks.get(id).cloned())
    }

    async fn list_playbooks(
        &self,
        owner_id: Option<&Uuid>,
    ) -> Result<Vec<Playbook>, RepositoryError> {
        let inner = self.lock();
        let mut playbooks: Vec<Playbook> = inner
            .playbooks
            .values()
            .filter(|p| owner_id.is_none_or(|o| p.owner_id == *o))
            .cloned()
            .collect();
        playbooks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(playbooks)
    }

    async fn delete_playbook(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.lock().playbooks.remove(id).is_some())
    }
}

impl ExecutionRepository for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        if inner.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        inner.executions.insert(execution.id, execution.clone());
        inner.step_logs.insert(execution.id, Vec::new());
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        if !inner.executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound);
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.lock().executions.get(id).cloned())
    }

    async fn record_transition(
        &self,
        execution: &Execution,
        entry: &StepLogEntry,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        if !inner.executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound);
        }
        inner.executions.insert(execution.id, execution.clone());
        inner
            .step_logs
            .entry(execution.id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_step_history(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepLogEntry>, RepositoryError> {
        let inner = self.lock();
        let mut entries = inner
            .step_logs
            .get(execution_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn list_interrupted(&self) -> Result<Vec<Execution>, RepositoryError> {
        let inner = self.lock();
        Ok(inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// InMemoryPromptStore
// ---------------------------------------------------------------------------

/// In-memory prompt store for tests and embedders.
#[derive(Default)]
pub struct InMemoryPromptStore {
    prompts: Mutex<HashMap<Uuid, PromptTemplate>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template to the store.
    pub fn put(&self, template: PromptTemplate) {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(template.id, template);
    }
}

impl PromptStore for InMemoryPromptStore {
    async fn get(&self, prompt_id: &Uuid) -> Result<Option<PromptTemplate>, RepositoryError> {
        Ok(self
            .prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(prompt_id)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
