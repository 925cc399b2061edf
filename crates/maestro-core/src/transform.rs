//! Deterministic transform step kernels.
//!
//! Each kernel is a pure function of `(TransformKind, input variables)`.
//! The kind set is a closed enum, so unknown operations are impossible at
//! run time (they fail playbook deserialization). Input variables are read
//! from the store by name, in argument order.

use maestro_types::playbook::TransformKind;
use serde_json::Value;

use crate::vars::{VariableStore, value_to_string};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from transform execution.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// An input variable doesn't exist in the store.
    #[error("transform input variable '{0}' not found")]
    MissingInput(String),

    /// The transform requires at least one input.
    #[error("transform requires at least one input variable")]
    NoInputs,

    /// `extract_json_field` input was not a JSON object (after parsing).
    #[error("input '{input}' is not a JSON object: {message}")]
    NotObject { input: String, message: String },

    /// `extract_json_field` field missing from the object.
    #[error("field '{field}' not found in input '{input}'")]
    FieldNotFound { field: String, input: String },

    /// `regex_replace` pattern failed to compile.
    #[error("invalid regex pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply a transform to its named inputs, producing the new value.
pub fn apply(
    kind: &TransformKind,
    inputs: &[String],
    store: &VariableStore,
) -> Result<Value, TransformError> {
    let first = || -> Result<&Value, TransformError> {
        let name = inputs.first().ok_or(TransformError::NoInputs)?;
        store
            .get(name)
            .ok_or_else(|| TransformError::MissingInput(name.clone()))
    };

    match kind {
        TransformKind::ExtractJsonField { field } => {
            let name = inputs.first().ok_or(TransformError::NoInputs)?;
            let value = store
                .get(name)
                .ok_or_else(|| TransformError::MissingInput(name.clone()))?;
            extract_field(name, field, value)
        }
        TransformKind::RegexReplace {
            pattern,
            replacement,
        } => {
            let re = regex::Regex::new(pattern).map_err(|e| TransformError::BadPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            let text = value_to_string(first()?);
            Ok(Value::String(
                re.replace_all(&text, replacement.as_str()).into_owned(),
            ))
        }
        TransformKind::Concat { separator } => {
            if inputs.is_empty() {
                return Err(TransformError::NoInputs);
            }
            let mut parts = Vec::with_capacity(inputs.len());
            for name in inputs {
                let value = store
                    .get(name)
                    .ok_or_else(|| TransformError::MissingInput(name.clone()))?;
                parts.push(value_to_string(value));
            }
            Ok(Value::String(parts.join(separator)))
        }
        TransformKind::Uppercase => Ok(Value::String(value_to_string(first()?).to_uppercase())),
        TransformKind::Lowercase => Ok(Value::String(value_to_string(first()?).to_lowercase())),
        TransformKind::Trim => Ok(Value::String(value_to_string(first()?).trim().to_string())),
    }
}

/// Pull `field` from a JSON object value, parsing string values as JSON
/// first.
fn extract_field(input: &str, field: &str, value: &Value) -> Result<Value, TransformError> {
    let parsed: Value = match value {
        Value::String(s) => serde_json::from_str(s).map_err(|e| TransformError::NotObject {
            input: input.to_string(),
            message: e.to_string(),
        })?,
        other => other.clone(),
    };
    let object = parsed.as_object().ok_or_else(|| TransformError::NotObject {
        input: input.to_string(),
        message: "value is not an object".to_string(),
    })?;
    object
        .get(field)
        .cloned()
        .ok_or_else(|| TransformError::FieldNotFound {
            field: field.to_string(),
            input: input.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VariableStore {
        let mut store = VariableStore::new();
        store.insert("summary", json!("  A Summary  ")).unwrap();
        store.insert("title", json!("ai weekly")).unwrap();
        store
            .insert("payload", json!(r#"{"name": "report", "score": 9}"#))
            .unwrap();
        store
    }

    fn one(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    // -------------------------------------------------------------------
    // String kernels
    // -------------------------------------------------------------------

    #[test]
    fn test_uppercase() {
        let result = apply(&TransformKind::Uppercase, &one("title"), &store()).unwrap();
        assert_eq!(result, json!("AI WEEKLY"));
    }

    #[test]
    fn test_lowercase() {
        let result = apply(&TransformKind::Lowercase, &one("summary"), &store()).unwrap();
        assert_eq!(result, json!("  a summary  "));
    }

    #[test]
    fn test_trim() {
        let result = apply(&TransformKind::Trim, &one("summary"), &store()).unwrap();
        assert_eq!(result, json!("A Summary"));
    }

    #[test]
    fn test_concat_with_separator() {
        let kind = TransformKind::Concat {
            separator: " | ".to_string(),
        };
        let inputs = vec!["title".to_string(), "summary".to_string()];
        let result = apply(&kind, &inputs, &store()).unwrap();
        assert_eq!(result, json!("ai weekly |   A Summary  "));
    }

    #[test]
    fn test_regex_replace() {
        let kind = TransformKind::RegexReplace {
            pattern: r"\s+".to_string(),
            replacement: " ".to_string(),
        };
        let result = apply(&kind, &one("summary"), &store()).unwrap();
        assert_eq!(result, json!(" A Summary "));
    }

    // -------------------------------------------------------------------
    // JSON field extraction
    // -------------------------------------------------------------------

    #[test]
    fn test_extract_json_field_from_string_input() {
        let kind = TransformKind::ExtractJsonField {
            field: "name".to_string(),
        };
        let result = apply(&kind, &one("payload"), &store()).unwrap();
        assert_eq!(result, json!("report"));
    }

    #[test]
    fn test_extract_json_field_from_object_input() {
        let mut s = store();
        s.insert("obj", json!({"x": 42})).unwrap();
        let kind = TransformKind::ExtractJsonField {
            field: "x".to_string(),
        };
        assert_eq!(apply(&kind, &one("obj"), &s).unwrap(), json!(42));
    }

    #[test]
    fn test_extract_json_field_missing_field() {
        let kind = TransformKind::ExtractJsonField {
            field: "missing".to_string(),
        };
        let err = apply(&kind, &one("payload"), &store()).unwrap_err();
        assert!(matches!(err, TransformError::FieldNotFound { .. }));
    }

    #[test]
    fn test_extract_json_field_non_object() {
        let kind = TransformKind::ExtractJsonField {
            field: "a".to_string(),
        };
        let err = apply(&kind, &one("title"), &store()).unwrap_err();
        assert!(matches!(err, TransformError::NotObject { .. }));
    }

    // -------------------------------------------------------------------
    // Input resolution
    // -------------------------------------------------------------------

    #[test]
    fn test_missing_input_variable() {
        let err = apply(&TransformKind::Uppercase, &one("ghost"), &store()).unwrap_err();
        assert!(matches!(err, TransformError::MissingInput(name) if name == "ghost"));
    }

    #[test]
    fn test_no_inputs() {
        let err = apply(&TransformKind::Uppercase, &[], &store()).unwrap_err();
        assert!(matches!(err, TransformError::NoInputs));
    }
}
