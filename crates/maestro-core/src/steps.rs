//! Step executors for the four playbook step kinds.
//!
//! `StepExecutors` dispatches to a handler per `StepConfig` variant. Each
//! handler is a pure function of `(config, VariableStore)` plus the injected
//! collaborators, and produces either a raw output value or a `StepError`.
//! Review steps never produce output: dispatching one yields
//! `StepError::ReviewRequired`, which the state machine turns into a pause.

use std::sync::Arc;

use maestro_types::config::EngineConfig;
use maestro_types::error::StepFault;
use maestro_types::llm::LlmRequest;
use maestro_types::playbook::{StepConfig, StepDefinition};
use serde_json::Value;
use uuid::Uuid;

use crate::budget::BudgetGuard;
use crate::llm::{LlmClient, PromptStore};
use crate::condition;
use crate::transform::{self, TransformError};
use crate::vars::VariableStore;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Outcome of a failed or suspended step dispatch.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A step-level fault, resolved through the step's error policy.
    #[error(transparent)]
    Fault(#[from] StepFault),

    /// A review gate was dispatched -- not a failure, the execution pauses.
    #[error("review required: {prompt}")]
    ReviewRequired {
        /// Rendered text shown to the reviewer.
        prompt: String,
        /// Read-only display of the requested variables.
        display: Value,
    },
}

// ---------------------------------------------------------------------------
// StepExecutors
// ---------------------------------------------------------------------------

/// Executes individual steps by dispatching to kind-specific handlers.
pub struct StepExecutors<S, L, B> {
    prompts: Arc<S>,
    llm: Arc<L>,
    budget: Arc<B>,
    config: EngineConfig,
}

impl<S, L, B> StepExecutors<S, L, B>
where
    S: PromptStore,
    L: LlmClient,
    B: BudgetGuard,
{
    /// Create executors over the injected collaborators.
    pub fn new(prompts: Arc<S>, llm: Arc<L>, budget: Arc<B>, config: EngineConfig) -> Self {
        Self {
            prompts,
            llm,
            budget,
            config,
        }
    }

    /// Run a step and return its raw output.
    pub async fn run(
        &self,
        user_id: Uuid,
        step: &StepDefinition,
        store: &VariableStore,
    ) -> Result<Value, StepError> {
        match &step.config {
            StepConfig::Prompt {
                prompt_text,
                prompt_id,
                model,
                temperature,
                max_tokens,
            } => {
                self.run_prompt(
                    user_id,
                    prompt_text.as_deref(),
                    prompt_id.as_ref(),
                    model.as_deref(),
                    *temperature,
                    *max_tokens,
                    store,
                )
                .await
            }
            StepConfig::Review {
                review_prompt,
                review_variables,
            } => self.run_review(review_prompt, review_variables, store),
            StepConfig::Condition { expression, .. } => self.run_condition(expression, store),
            StepConfig::Transform { transform, inputs } => {
                self.run_transform(transform, inputs, store)
            }
        }
    }

    // -- Prompt: render, reserve budget, call the LLM collaborator --

    #[allow(clippy::too_many_arguments)]
    async fn run_prompt(
        &self,
        user_id: Uuid,
        prompt_text: Option<&str>,
        prompt_id: Option<&Uuid>,
        model: Option<&str>,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
        store: &VariableStore,
    ) -> Result<Value, StepError> {
        let template = match (prompt_text, prompt_id) {
            (Some(text), _) => text.to_string(),
            (None, Some(id)) => {
                let found = self
                    .prompts
                    .get(id)
                    .await
                    .map_err(|e| StepFault::Provider(format!("prompt store error: {e}")))?;
                found
                    .ok_or_else(|| StepFault::Template(format!("prompt template {id} not found")))?
                    .text
            }
            // Validation rejects this shape; defend anyway.
            (None, None) => {
                return Err(StepFault::Template("prompt step has no prompt source".to_string())
                    .into());
            }
        };

        let rendered = store
            .render(&template)
            .map_err(|e| StepFault::Template(e.to_string()))?;

        let model = model.unwrap_or(&self.config.default_model).to_string();
        let max_tokens = max_tokens.unwrap_or(self.config.default_max_tokens);

        // Rough pre-flight estimate: ~4 bytes per input token plus the
        // response ceiling.
        let estimated = (rendered.len() / 4) as u32 + max_tokens;
        self.budget
            .check_and_reserve(user_id, estimated)
            .await
            .map_err(|e| StepFault::BudgetExceeded(e.reason))?;

        let request = LlmRequest {
            model,
            prompt: rendered,
            temperature,
            max_tokens,
        };
        tracing::debug!(model = request.model.as_str(), "dispatching prompt step");

        let response = self
            .llm
            .execute(&request)
            .await
            .map_err(|e| StepFault::Provider(e.to_string()))?;

        self.budget.record_usage(user_id, &response.usage).await;
        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "prompt step completed"
        );

        Ok(Value::String(response.text))
    }

    // -- Review: no computation, signal the pause --

    fn run_review(
        &self,
        review_prompt: &str,
        review_variables: &[String],
        store: &VariableStore,
    ) -> Result<Value, StepError> {
        let prompt = store
            .render(review_prompt)
            .map_err(|e| StepFault::Template(e.to_string()))?;

        // Display hints only: absent variables are omitted, not errors.
        let mut display = serde_json::Map::new();
        for name in review_variables {
            if let Some(value) = store.get(name) {
                display.insert(name.clone(), value.clone());
            }
        }

        Err(StepError::ReviewRequired {
            prompt,
            display: Value::Object(display),
        })
    }

    // -- Condition: evaluate the expression, output the branch decision --

    fn run_condition(&self, expression: &str, store: &VariableStore) -> Result<Value, StepError> {
        let result = condition::evaluate(expression, store)
            .map_err(|e| StepFault::Template(e.to_string()))?;
        tracing::debug!(expression, result, "condition evaluated");
        Ok(Value::Bool(result))
    }

    // -- Transform: deterministic kernel over named inputs --

    fn run_transform(
        &self,
        kind: &maestro_types::playbook::TransformKind,
        inputs: &[String],
        store: &VariableStore,
    ) -> Result<Value, StepError> {
        transform::apply(kind, inputs, store).map_err(|e| {
            match e {
                // Missing variables are template-level faults; operational
                // failures are extraction-level.
                TransformError::MissingInput(_) | TransformError::NoInputs => {
                    StepFault::Template(e.to_string())
                }
                _ => StepFault::Extraction(e.to_string()),
            }
            .into()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
