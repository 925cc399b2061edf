//! Execution state machine: the engine's algorithmic core.
//!
//! `ExecutionEngine` advances one execution at a time through its playbook's
//! step sequence, applying each step's error policy (retry/fallback/abort),
//! persisting every transition together with its audit entry, and exposing
//! pause/resume (review gates) and cancellation.
//!
//! # Locking protocol
//!
//! `advance` is serialized per execution via a `DashMap` of async mutexes.
//! The per-execution lock is held only to read/validate state before a step
//! runs and to apply the transition after it returns -- never across the
//! LLM call itself. After an external call returns, the execution is
//! re-loaded and re-validated: a result arriving after cancellation is
//! recorded as a `skipped` entry and never applied.
//!
//! # Commit protocol
//!
//! A transition is committed by `ExecutionRepository::record_transition`,
//! which persists the updated execution and the appended log entry as one
//! atomic unit. In-memory state advances only after persistence succeeds,
//! so a storage failure aborts the `advance` attempt without advancing
//! `current_step` anywhere.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use maestro_types::config::EngineConfig;
use maestro_types::error::{EngineError, RepositoryError, StepFault};
use maestro_types::execution::{
    Execution, ExecutionStatus, FailureInfo, ReviewDecision, StepLogEntry,
};
use maestro_types::identity::AuthContext;
use maestro_types::playbook::{OnError, Playbook, StepConfig, StepDefinition, Visibility};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditRecorder;
use crate::budget::BudgetGuard;
use crate::definition;
use crate::extract;
use crate::llm::{LlmClient, PromptStore};
use crate::repository::{ExecutionRepository, PlaybookRepository};
use crate::steps::{StepError, StepExecutors};
use crate::vars::VariableStore;

/// Failure reason recorded when a reviewer rejects a paused execution.
pub const REJECTED_BY_REVIEWER: &str = "rejected_by_reviewer";

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// The playbook execution state machine.
///
/// Generic over its collaborators so tests can substitute deterministic
/// fakes: `R` is the persistence store, `S` the prompt store, `L` the LLM
/// client, and `B` the budget guard.
pub struct ExecutionEngine<R, S, L, B> {
    repo: Arc<R>,
    executors: StepExecutors<S, L, B>,
    config: EngineConfig,
    /// Per-execution advance locks.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Cancellation tokens for executions with an active driver.
    cancel_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R, S, L, B> ExecutionEngine<R, S, L, B>
where
    R: PlaybookRepository + ExecutionRepository,
    S: PromptStore,
    L: LlmClient,
    B: BudgetGuard,
{
    /// Create an engine over the injected collaborators.
    pub fn new(
        repo: Arc<R>,
        prompts: Arc<S>,
        llm: Arc<L>,
        budget: Arc<B>,
        config: EngineConfig,
    ) -> Self {
        let executors = StepExecutors::new(prompts, llm, budget, config.clone());
        Self {
            repo,
            executors,
            config,
            locks: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Start an execution and drive it synchronously until it completes,
    /// fails, is cancelled, or pauses for review.
    pub async fn start(
        &self,
        auth: &AuthContext,
        playbook_id: Uuid,
        inputs: &serde_json::Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let execution = self.prepare_start(auth, playbook_id, inputs).await?;
        self.drive(execution.id).await
    }

    /// Start an execution and drive it on a background task.
    ///
    /// Returns as soon as the execution is persisted as `Running`; the
    /// caller observes progress through `get_execution`.
    pub async fn start_detached(
        self: &Arc<Self>,
        auth: &AuthContext,
        playbook_id: Uuid,
        inputs: &serde_json::Map<String, Value>,
    ) -> Result<Execution, EngineError>
    where
        R: 'static,
        S: 'static,
        L: 'static,
        B: 'static,
    {
        let execution = self.prepare_start(auth, playbook_id, inputs).await?;
        let engine = Arc::clone(self);
        let execution_id = execution.id;
        tokio::spawn(async move {
            if let Err(e) = engine.drive(execution_id).await {
                tracing::error!(execution_id = %execution_id, error = %e, "detached drive failed");
            }
        });
        Ok(execution)
    }

    /// Submit the decision for an execution paused at a review step.
    ///
    /// Valid only while `status == PausedForReview`; otherwise fails with
    /// `InvalidState` and has no side effect. Approval appends exactly one
    /// `success` entry for the review step and resumes the drive; rejection
    /// fails the execution with reason `rejected_by_reviewer`.
    pub async fn submit_review(
        &self,
        auth: &AuthContext,
        execution_id: Uuid,
        decision: ReviewDecision,
        comment: Option<&str>,
    ) -> Result<Execution, EngineError> {
        {
            let lock = self.lock_for(execution_id);
            let _guard = lock.lock().await;

            let mut execution = self.load_execution_required(&execution_id).await?;
            self.authorize(auth, &execution)?;
            if execution.status != ExecutionStatus::PausedForReview {
                return Err(EngineError::InvalidState(format!(
                    "execution {execution_id} is not paused for review (status: {:?})",
                    execution.status
                )));
            }

            let playbook = self.load_playbook_required(&execution.playbook_id).await?;
            let step_id = execution.current_step.clone().ok_or_else(|| {
                EngineError::InvalidState("paused execution has no current step".to_string())
            })?;
            let step = playbook.step(&step_id).ok_or_else(|| {
                EngineError::InvalidState(format!("paused at unknown step '{step_id}'"))
            })?;

            let seq = self.repo.list_step_history(&execution_id).await?.len() as u32 + 1;
            let recorder = AuditRecorder::new(execution_id, self.config.snapshot_limit_bytes);
            let started_at = Utc::now();
            let input_snapshot = execution.variables.clone();

            match decision {
                ReviewDecision::Approve => {
                    let mut store = self.store_from(&execution)?;
                    if let Some(var) = &step.output_variable {
                        store
                            .insert(var, json!(decision.as_str()))
                            .map_err(|e| EngineError::Validation(e.to_string()))?;
                    }
                    let output = json!({
                        "decision": decision.as_str(),
                        "comment": comment,
                    });
                    let entry = recorder.success(
                        seq,
                        &step_id,
                        1,
                        started_at,
                        &input_snapshot,
                        &output,
                    );

                    execution.variables = store.to_json();
                    match playbook.step_after(&step_id) {
                        Some(next) => {
                            execution.status = ExecutionStatus::Running;
                            execution.current_step = Some(next.id.clone());
                        }
                        None => {
                            execution.status = ExecutionStatus::Completed;
                            execution.current_step = None;
                            execution.completed_at = Some(Utc::now());
                        }
                    }
                    self.repo.record_transition(&execution, &entry).await?;
                    tracing::info!(
                        execution_id = %execution_id,
                        step_id = step_id.as_str(),
                        "review approved"
                    );
                }
                ReviewDecision::Reject => {
                    let entry = recorder.error(
                        seq,
                        &step_id,
                        1,
                        started_at,
                        &input_snapshot,
                        REJECTED_BY_REVIEWER,
                    );
                    execution.status = ExecutionStatus::Failed;
                    execution.failure = Some(FailureInfo {
                        step_id: Some(step_id.clone()),
                        reason: REJECTED_BY_REVIEWER.to_string(),
                    });
                    execution.completed_at = Some(Utc::now());
                    self.repo.record_transition(&execution, &entry).await?;
                    tracing::info!(
                        execution_id = %execution_id,
                        step_id = step_id.as_str(),
                        "review rejected"
                    );
                    return Ok(execution);
                }
            }
        }

        // Approved: resume the drive outside the lock.
        self.drive(execution_id).await
    }

    /// Cancel an execution.
    ///
    /// Valid from any non-terminal state. The status flips to `Cancelled`
    /// synchronously; an in-flight step is allowed to finish its attempt
    /// but its late result is logged as `skipped` and never applied.
    pub async fn cancel(
        &self,
        auth: &AuthContext,
        execution_id: Uuid,
    ) -> Result<Execution, EngineError> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        let mut execution = self.load_execution_required(&execution_id).await?;
        self.authorize(auth, &execution)?;
        if execution.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "execution {execution_id} is already terminal (status: {:?})",
                execution.status
            )));
        }

        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.repo.save_execution(&execution).await?;

        // Signal an active driver so it discards the in-flight result.
        if let Some(token) = self.cancel_tokens.get(&execution_id) {
            token.cancel();
        }

        tracing::info!(execution_id = %execution_id, "execution cancelled");
        Ok(execution)
    }

    /// Fetch an execution.
    pub async fn get_execution(
        &self,
        auth: &AuthContext,
        execution_id: Uuid,
    ) -> Result<Execution, EngineError> {
        let execution = self.load_execution_required(&execution_id).await?;
        self.authorize(auth, &execution)?;
        Ok(execution)
    }

    /// Step history for an execution, in dispatch order.
    pub async fn list_step_history(
        &self,
        auth: &AuthContext,
        execution_id: Uuid,
    ) -> Result<Vec<StepLogEntry>, EngineError> {
        let execution = self.load_execution_required(&execution_id).await?;
        self.authorize(auth, &execution)?;
        Ok(self.repo.list_step_history(&execution_id).await?)
    }

    /// Executions a crashed process left in `Running` (admin only).
    pub async fn list_interrupted(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<Execution>, EngineError> {
        if auth.role != maestro_types::identity::Role::Admin {
            return Err(EngineError::Forbidden(
                "listing interrupted executions requires admin".to_string(),
            ));
        }
        Ok(self.repo.list_interrupted().await?)
    }

    /// Re-drive an execution left in `Running` by a crashed process.
    ///
    /// Picks up from the persisted `current_step` and variable snapshot.
    pub async fn resume_interrupted(
        &self,
        auth: &AuthContext,
        execution_id: Uuid,
    ) -> Result<Execution, EngineError> {
        let execution = self.load_execution_required(&execution_id).await?;
        self.authorize(auth, &execution)?;
        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "execution {execution_id} is not resumable (status: {:?})",
                execution.status
            )));
        }
        tracing::info!(execution_id = %execution_id, "resuming interrupted execution");
        self.drive(execution_id).await
    }

    // -----------------------------------------------------------------------
    // Start plumbing
    // -----------------------------------------------------------------------

    /// Validate inputs, create the execution, and persist it as `Running`.
    async fn prepare_start(
        &self,
        auth: &AuthContext,
        playbook_id: Uuid,
        inputs: &serde_json::Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let playbook = self.load_playbook_required(&playbook_id).await?;
        if playbook.visibility == Visibility::Private && !auth.can_act_on(playbook.owner_id) {
            return Err(EngineError::Forbidden(format!(
                "playbook {playbook_id} is private"
            )));
        }
        definition::validate_playbook(&playbook)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let store = seed_variables(&playbook, inputs)?;
        let first_step = playbook
            .first_step()
            .map(|s| s.id.clone())
            .ok_or_else(|| EngineError::Validation("playbook has no steps".to_string()))?;

        let mut execution = Execution {
            id: Uuid::now_v7(),
            playbook_id,
            playbook_version: playbook.version,
            user_id: auth.user_id,
            status: ExecutionStatus::Pending,
            current_step: Some(first_step),
            variables: store.to_json(),
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        };
        self.repo.create_execution(&execution).await?;

        execution.status = ExecutionStatus::Running;
        self.repo.save_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            playbook = playbook.name.as_str(),
            version = playbook.version,
            "execution started"
        );
        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // The drive loop
    // -----------------------------------------------------------------------

    /// Advance the execution until it reaches a terminal state or pauses.
    ///
    /// At most one driver per execution: the cancellation-token map doubles
    /// as the active-driver registry.
    async fn drive(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let cancel_token = match self.cancel_tokens.entry(execution_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::InvalidState(format!(
                    "execution {execution_id} already has an active driver"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CancellationToken::new()).clone()
            }
        };
        let result = self.drive_inner(execution_id, &cancel_token).await;
        self.cancel_tokens.remove(&execution_id);
        result
    }

    async fn drive_inner(
        &self,
        execution_id: Uuid,
        cancel_token: &CancellationToken,
    ) -> Result<Execution, EngineError> {
        let lock = self.lock_for(execution_id);
        let recorder = AuditRecorder::new(execution_id, self.config.snapshot_limit_bytes);
        let mut dispatched: u32 = 0;

        'steps: loop {
            // Read and validate current state under the lock.
            let guard = lock.lock().await;
            let execution = self.load_execution_required(&execution_id).await?;
            if execution.status != ExecutionStatus::Running {
                return Ok(execution);
            }
            let playbook = self.load_playbook_required(&execution.playbook_id).await?;
            let Some(step_id) = execution.current_step.clone() else {
                return Err(EngineError::InvalidState(
                    "running execution has no current step".to_string(),
                ));
            };
            let Some(step) = playbook.step(&step_id).cloned() else {
                let mut failed = execution;
                fail(&mut failed, Some(step_id.clone()), "current step not in playbook");
                self.repo.save_execution(&failed).await?;
                return Ok(failed);
            };
            let mut store = self.store_from(&execution)?;
            let mut seq = self.repo.list_step_history(&execution_id).await?.len() as u32;
            drop(guard);

            dispatched += 1;
            if dispatched > self.config.max_dispatched_steps {
                let _guard = lock.lock().await;
                let mut current = self.load_execution_required(&execution_id).await?;
                if current.is_terminal() {
                    return Ok(current);
                }
                fail(
                    &mut current,
                    Some(step_id),
                    &format!(
                        "dispatched more than {} steps (possible condition cycle)",
                        self.config.max_dispatched_steps
                    ),
                );
                self.repo.save_execution(&current).await?;
                return Ok(current);
            }

            let attempts_allowed = match step.on_error.on_error {
                OnError::Abort => 1,
                OnError::Retry | OnError::Fallback => 1 + step.on_error.retry_count,
            };
            let mut attempt: u32 = 0;

            'attempts: loop {
                attempt += 1;
                let started_at = Utc::now();
                let input_snapshot = store.to_json();

                // Execute without holding the lock: the LLM call may be slow.
                let result = self
                    .executors
                    .run(execution.user_id, &step, &store)
                    .await;

                // Re-acquire and re-validate before applying anything.
                let guard = lock.lock().await;
                let mut current = self.load_execution_required(&execution_id).await?;
                if current.is_terminal() || cancel_token.is_cancelled() {
                    if !matches!(result, Err(StepError::ReviewRequired { .. })) {
                        seq += 1;
                        let entry = recorder.skipped(
                            seq,
                            &step.id,
                            attempt,
                            started_at,
                            "result discarded: execution cancelled while step was in flight",
                        );
                        if let Err(e) = self.repo.record_transition(&current, &entry).await {
                            tracing::warn!(
                                execution_id = %execution_id,
                                error = %e,
                                "failed to record discarded in-flight result"
                            );
                        }
                    }
                    tracing::debug!(
                        execution_id = %execution_id,
                        step_id = step.id.as_str(),
                        "in-flight result discarded after cancellation"
                    );
                    return Ok(current);
                }

                let fault: StepFault = match result {
                    Err(StepError::ReviewRequired { prompt, .. }) => {
                        // No log entry until the decision arrives.
                        current.status = ExecutionStatus::PausedForReview;
                        self.repo.save_execution(&current).await?;
                        tracing::info!(
                            execution_id = %execution_id,
                            step_id = step.id.as_str(),
                            prompt = prompt.as_str(),
                            "execution paused for review"
                        );
                        return Ok(current);
                    }
                    Ok(raw) => {
                        match self.apply_output(&step, &raw, &mut store) {
                            Ok(()) => {
                                seq += 1;
                                let entry = recorder.success(
                                    seq,
                                    &step.id,
                                    attempt,
                                    started_at,
                                    &input_snapshot,
                                    &raw,
                                );
                                let next = next_step(&playbook, &step, &raw);
                                current.variables = store.to_json();
                                match next {
                                    Some(next_id) => current.current_step = Some(next_id),
                                    None => {
                                        current.status = ExecutionStatus::Completed;
                                        current.current_step = None;
                                        current.completed_at = Some(Utc::now());
                                    }
                                }
                                self.repo.record_transition(&current, &entry).await?;

                                if current.is_terminal() {
                                    tracing::info!(
                                        execution_id = %execution_id,
                                        steps = seq,
                                        "execution completed"
                                    );
                                    return Ok(current);
                                }
                                tracing::debug!(
                                    execution_id = %execution_id,
                                    step_id = step.id.as_str(),
                                    next = current.current_step.as_deref().unwrap_or(""),
                                    "step succeeded"
                                );
                                continue 'steps;
                            }
                            Err(fault) => fault,
                        }
                    }
                    Err(StepError::Fault(fault)) => fault,
                };

                // Fault path: append the attempt's entry, then resolve the
                // step's error policy.
                seq += 1;
                let entry = recorder.error(
                    seq,
                    &step.id,
                    attempt,
                    started_at,
                    &input_snapshot,
                    &fault.to_string(),
                );

                if fault.is_retryable() && attempt < attempts_allowed {
                    self.repo.record_transition(&current, &entry).await?;
                    tracing::debug!(
                        execution_id = %execution_id,
                        step_id = step.id.as_str(),
                        attempt,
                        error = %fault,
                        "step attempt failed, retrying"
                    );
                    drop(guard);
                    continue 'attempts;
                }

                // Attempts exhausted (or a budget hard stop): fall back when
                // a valid fallback target is configured, otherwise abort.
                let fallback = if step.on_error.on_error != OnError::Abort {
                    step.on_error
                        .fallback_step
                        .as_ref()
                        .filter(|id| playbook.step(id).is_some())
                        .cloned()
                } else {
                    None
                };

                match fallback {
                    Some(fallback_id) => {
                        current.current_step = Some(fallback_id.clone());
                        current.variables = store.to_json();
                        self.repo.record_transition(&current, &entry).await?;
                        tracing::info!(
                            execution_id = %execution_id,
                            step_id = step.id.as_str(),
                            fallback = fallback_id.as_str(),
                            error = %fault,
                            "step failed, jumping to fallback"
                        );
                        continue 'steps;
                    }
                    None => {
                        fail(&mut current, Some(step.id.clone()), &fault.to_string());
                        self.repo.record_transition(&current, &entry).await?;
                        tracing::info!(
                            execution_id = %execution_id,
                            step_id = step.id.as_str(),
                            error = %fault,
                            "execution failed"
                        );
                        return Ok(current);
                    }
                }
            }
        }
    }

    /// Run the output extractor and store the result, converting failures
    /// into step faults.
    fn apply_output(
        &self,
        step: &StepDefinition,
        raw: &Value,
        store: &mut VariableStore,
    ) -> Result<(), StepFault> {
        let value =
            extract::apply(&step.extraction, raw).map_err(|e| StepFault::Extraction(e.to_string()))?;
        if let Some(var) = &step.output_variable {
            store
                .insert(var, value)
                .map_err(|e| StepFault::Extraction(e.to_string()))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock_for(&self, execution_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(execution_id).or_default().clone()
    }

    fn authorize(&self, auth: &AuthContext, execution: &Execution) -> Result<(), EngineError> {
        if auth.can_act_on(execution.user_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "execution {} belongs to another user",
                execution.id
            )))
        }
    }

    async fn load_execution_required(&self, id: &Uuid) -> Result<Execution, EngineError> {
        self.repo
            .load_execution(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))
    }

    async fn load_playbook_required(&self, id: &Uuid) -> Result<Playbook, EngineError> {
        self.repo
            .get_playbook(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("playbook {id}")))
    }

    fn store_from(&self, execution: &Execution) -> Result<VariableStore, EngineError> {
        VariableStore::from_json(&execution.variables).map_err(|e| {
            EngineError::Storage(RepositoryError::Query(format!(
                "corrupt variable snapshot: {e}"
            )))
        })
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Move an execution to `Failed` with a recorded reason.
fn fail(execution: &mut Execution, step_id: Option<String>, reason: &str) {
    execution.status = ExecutionStatus::Failed;
    execution.failure = Some(FailureInfo {
        step_id,
        reason: reason.to_string(),
    });
    execution.completed_at = Some(Utc::now());
}

/// Compute the step after a successful dispatch: condition steps jump to
/// their branch target, everything else advances sequentially.
fn next_step(playbook: &Playbook, step: &StepDefinition, raw: &Value) -> Option<String> {
    match &step.config {
        StepConfig::Condition {
            true_step,
            false_step,
            ..
        } => {
            let branch = if raw.as_bool().unwrap_or(false) {
                true_step
            } else {
                false_step
            };
            Some(branch.clone())
        }
        _ => playbook.step_after(&step.id).map(|s| s.id.clone()),
    }
}

/// Seed the variable store from declared inputs, validating presence and
/// types.
fn seed_variables(
    playbook: &Playbook,
    inputs: &serde_json::Map<String, Value>,
) -> Result<VariableStore, EngineError> {
    for name in inputs.keys() {
        if !playbook.initial_inputs.iter().any(|d| &d.name == name) {
            return Err(EngineError::Validation(format!(
                "unknown input variable '{name}'"
            )));
        }
    }

    let mut store = VariableStore::new();
    for declaration in &playbook.initial_inputs {
        match inputs.get(&declaration.name) {
            Some(value) => {
                if !declaration.var_type.matches(value) {
                    return Err(EngineError::Validation(format!(
                        "input '{}' does not match declared type {:?}",
                        declaration.name, declaration.var_type
                    )));
                }
                store
                    .insert(&declaration.name, value.clone())
                    .map_err(|e| EngineError::Validation(e.to_string()))?;
            }
            None if declaration.required => {
                return Err(EngineError::Validation(format!(
                    "missing required input '{}'",
                    declaration.name
                )));
            }
            None => {}
        }
    }
    Ok(store)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
