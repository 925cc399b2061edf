//! Playbook parsing and structural validation.
//!
//! Converts between YAML documents and `Playbook` values and validates the
//! constraints that make a playbook runnable: unique step IDs, resolvable
//! branch targets, exactly one prompt source per prompt step, compilable
//! regex patterns. Invalid playbooks fail fast here, never mid-run.

use std::collections::HashSet;

use maestro_types::playbook::{ExtractionRule, Playbook, StepConfig, TransformKind};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from playbook parsing and validation.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure (includes unknown step/transform kinds).
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `Playbook`.
///
/// Runs `validate_playbook` after deserialization, so the returned value is
/// guaranteed to be structurally valid.
pub fn parse_playbook_yaml(yaml: &str) -> Result<Playbook, DefinitionError> {
    let playbook: Playbook =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_playbook(&playbook)?;
    Ok(playbook)
}

/// Serialize a `Playbook` to a YAML string.
pub fn serialize_playbook_yaml(playbook: &Playbook) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(playbook).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `Playbook`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - At least one step exists
/// - All step IDs are unique
/// - Condition branch targets reference existing step IDs
/// - Prompt steps carry exactly one of `prompt_text` / `prompt_id`
/// - Transform steps declare at least one input
/// - Regex patterns (extraction rules and regex_replace) compile
/// - Input declaration names are unique and non-empty
///
/// Fallback targets are deliberately not checked: an invalid fallback is
/// treated as abort at run time.
pub fn validate_playbook(playbook: &Playbook) -> Result<(), DefinitionError> {
    if playbook.name.is_empty() {
        return Err(DefinitionError::Validation(
            "playbook name must not be empty".to_string(),
        ));
    }
    if !playbook
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(DefinitionError::Validation(format!(
            "playbook name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            playbook.name
        )));
    }

    if playbook.steps.is_empty() {
        return Err(DefinitionError::Validation(
            "playbook must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &playbook.steps {
        if step.id.is_empty() {
            return Err(DefinitionError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    let mut seen_inputs = HashSet::new();
    for input in &playbook.initial_inputs {
        if input.name.is_empty() {
            return Err(DefinitionError::Validation(
                "input declaration name must not be empty".to_string(),
            ));
        }
        if !seen_inputs.insert(input.name.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate input declaration: '{}'",
                input.name
            )));
        }
    }

    for step in &playbook.steps {
        match &step.config {
            StepConfig::Prompt {
                prompt_text,
                prompt_id,
                ..
            } => match (prompt_text, prompt_id) {
                (None, None) => {
                    return Err(DefinitionError::Validation(format!(
                        "prompt step '{}' needs prompt_text or prompt_id",
                        step.id
                    )));
                }
                (Some(_), Some(_)) => {
                    return Err(DefinitionError::Validation(format!(
                        "prompt step '{}' must not set both prompt_text and prompt_id",
                        step.id
                    )));
                }
                _ => {}
            },
            StepConfig::Condition {
                expression,
                true_step,
                false_step,
            } => {
                if expression.trim().is_empty() {
                    return Err(DefinitionError::Validation(format!(
                        "condition step '{}' has an empty expression",
                        step.id
                    )));
                }
                for target in [true_step, false_step] {
                    if !seen_ids.contains(target.as_str()) {
                        return Err(DefinitionError::Validation(format!(
                            "condition step '{}' references unknown step '{}'",
                            step.id, target
                        )));
                    }
                }
            }
            StepConfig::Transform { transform, inputs } => {
                if inputs.is_empty() {
                    return Err(DefinitionError::Validation(format!(
                        "transform step '{}' declares no input variables",
                        step.id
                    )));
                }
                if let TransformKind::RegexReplace { pattern, .. } = transform {
                    compile_pattern(&step.id, pattern)?;
                }
            }
            StepConfig::Review { .. } => {}
        }

        if let ExtractionRule::Regex { pattern } = &step.extraction {
            compile_pattern(&step.id, pattern)?;
        }
    }

    Ok(())
}

fn compile_pattern(step_id: &str, pattern: &str) -> Result<(), DefinitionError> {
    regex::Regex::new(pattern).map_err(|e| {
        DefinitionError::Validation(format!(
            "step '{step_id}' has an invalid regex pattern '{pattern}': {e}"
        ))
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
