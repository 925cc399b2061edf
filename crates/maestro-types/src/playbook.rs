//! Playbook domain types for Maestro.
//!
//! A playbook is an immutable, named, ordered workflow template. Each step is
//! one of a closed set of kinds (prompt, review, condition, transform) with a
//! type-specific configuration payload, an optional output variable, an output
//! extraction rule, and a per-step error policy. Definitions round-trip
//! through JSON (storage) and YAML (authoring).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

/// An immutable workflow template.
///
/// Playbooks are never mutated mid-execution: updates go through the playbook
/// repository, which stores a new `version`. Running executions keep the
/// version they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Human-readable playbook name (alphanumeric + hyphens).
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic revision, bumped by every update operation.
    pub version: u32,
    /// The user who owns this playbook.
    pub owner_id: Uuid,
    /// Who may start executions of this playbook.
    #[serde(default)]
    pub visibility: Visibility,
    /// Declared initial input variables, in declaration order.
    #[serde(default)]
    pub initial_inputs: Vec<InputDeclaration>,
    /// Ordered step sequence. Dispatch is sequential unless a condition
    /// step jumps.
    pub steps: Vec<StepDefinition>,
    /// When the playbook was first created.
    pub created_at: DateTime<Utc>,
    /// When the playbook was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Playbook {
    /// Look up a step by its ID.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The first step in the sequence, if any.
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// The step immediately after `step_id` in sequence order.
    ///
    /// Returns `None` when `step_id` is the last step or unknown.
    pub fn step_after(&self, step_id: &str) -> Option<&StepDefinition> {
        let idx = self.steps.iter().position(|s| s.id == step_id)?;
        self.steps.get(idx + 1)
    }
}

/// Who may start executions of a playbook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the owner (or an admin) may run it.
    #[default]
    Private,
    /// Any authenticated user may run it.
    Public,
}

// ---------------------------------------------------------------------------
// Input declarations
// ---------------------------------------------------------------------------

/// A declared initial input variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDeclaration {
    /// Variable name seeded into the variable store.
    pub name: String,
    /// Expected value type, checked at `start`.
    #[serde(rename = "type")]
    pub var_type: VariableType,
    /// Whether the caller must supply this input.
    #[serde(default)]
    pub required: bool,
    /// Display label for UIs collecting the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The type of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Number,
    Boolean,
    Json,
}

impl VariableType {
    /// Whether a JSON value matches this declared type.
    ///
    /// `Json` accepts any value (including null).
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            VariableType::Text => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Json => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// A single step in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID (e.g. "summarize"). Unique within a playbook.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Kind-specific configuration payload.
    pub config: StepConfig,
    /// Variable the extracted output is stored under. Later steps read the
    /// latest value (last-write-wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    /// How the step's raw output becomes the stored value.
    #[serde(default)]
    pub extraction: ExtractionRule,
    /// What to do when this step fails.
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl StepDefinition {
    /// Short kind label for logging and audit entries.
    pub fn kind(&self) -> &'static str {
        match self.config {
            StepConfig::Prompt { .. } => "prompt",
            StepConfig::Review { .. } => "review",
            StepConfig::Condition { .. } => "condition",
            StepConfig::Transform { .. } => "transform",
        }
    }
}

/// Kind-specific step configuration.
///
/// Internally tagged by `type` to match the YAML structure:
/// ```yaml
/// config:
///   type: prompt
///   prompt_text: "Summarize {{doc}}"
///   model: claude-sonnet-4-20250514
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Render a prompt template and call the LLM collaborator.
    Prompt {
        /// Inline prompt text. Exactly one of `prompt_text` / `prompt_id`
        /// must be set (enforced at validation).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_text: Option<String>,
        /// Prompt template looked up from the prompt store by ID.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_id: Option<Uuid>,
        /// Model override (engine default when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
    /// Human review gate. Dispatching it pauses the execution until an
    /// external decision arrives.
    Review {
        /// Text shown to the reviewer (templated).
        review_prompt: String,
        /// Variables displayed alongside the prompt. Read-only hints, not
        /// control-flow inputs.
        #[serde(default)]
        review_variables: Vec<String>,
    },
    /// Conditional branch. Evaluates a boolean expression against the
    /// variable store and jumps to one of two step IDs.
    Condition {
        expression: String,
        true_step: String,
        false_step: String,
    },
    /// Deterministic string/data operation over named input variables.
    Transform {
        transform: TransformKind,
        /// Input variable names, in argument order.
        inputs: Vec<String>,
    },
}

/// The closed set of deterministic transform operations.
///
/// Unknown kinds fail at deserialization, which is playbook-validation time,
/// never at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformKind {
    /// Pull a single field out of a JSON object input.
    ExtractJsonField { field: String },
    /// Replace every match of `pattern` with `replacement`.
    RegexReplace { pattern: String, replacement: String },
    /// Join the stringified inputs with a separator.
    Concat {
        #[serde(default = "default_separator")]
        separator: String,
    },
    Uppercase,
    Lowercase,
    Trim,
}

fn default_separator() -> String {
    " ".to_string()
}

// ---------------------------------------------------------------------------
// Output extraction
// ---------------------------------------------------------------------------

/// How a step's raw output becomes the stored variable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionRule {
    /// Store the raw output as-is.
    #[default]
    None,
    /// First capture group of the pattern. No match is an extraction fault.
    Regex { pattern: String },
    /// Dotted path into a parsed JSON payload. Parse failure or a missing
    /// path is an extraction fault.
    JsonPath { path: String },
}

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

/// Per-step failure handling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    /// What to do when the step faults.
    #[serde(default)]
    pub on_error: OnError,
    /// Additional attempts after the first (retry/fallback modes).
    #[serde(default)]
    pub retry_count: u32,
    /// Step to jump to after attempts are exhausted. An invalid target is
    /// treated as abort at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step: Option<String>,
}

/// The failure-handling mode for a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Fail the execution immediately.
    #[default]
    Abort,
    /// Re-invoke the step up to `retry_count` more times, then abort
    /// (or fall back when a fallback step is also configured).
    Retry,
    /// After attempts are exhausted, jump to `fallback_step`.
    Fallback,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
