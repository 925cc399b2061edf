//! Output extraction: converts a step's raw output into the stored value.
//!
//! Three rules: `none` (store as-is), `regex` (first capture group), and
//! `json_path` (dotted path into a parsed JSON payload). Extraction
//! failures are step faults and flow through the same error policy as the
//! step itself.

use maestro_types::playbook::ExtractionRule;
use serde_json::Value;

use crate::vars::value_to_string;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from output extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },

    #[error("regex '{0}' did not match the output")]
    NoMatch(String),

    #[error("regex '{0}' has no capture group")]
    NoCaptureGroup(String),

    #[error("output is not valid JSON: {0}")]
    NotJson(String),

    #[error("JSON path '{path}' not found (stopped at '{segment}')")]
    PathNotFound { path: String, segment: String },
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Apply an extraction rule to a step's raw output.
pub fn apply(rule: &ExtractionRule, raw: &Value) -> Result<Value, ExtractError> {
    match rule {
        ExtractionRule::None => Ok(raw.clone()),
        ExtractionRule::Regex { pattern } => extract_regex(pattern, raw),
        ExtractionRule::JsonPath { path } => extract_json_path(path, raw),
    }
}

/// First capture group of `pattern` against the stringified output.
fn extract_regex(pattern: &str, raw: &Value) -> Result<Value, ExtractError> {
    let re = regex::Regex::new(pattern).map_err(|e| ExtractError::BadPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    let haystack = value_to_string(raw);
    let captures = re
        .captures(&haystack)
        .ok_or_else(|| ExtractError::NoMatch(pattern.to_string()))?;
    let group = captures
        .get(1)
        .ok_or_else(|| ExtractError::NoCaptureGroup(pattern.to_string()))?;
    Ok(Value::String(group.as_str().to_string()))
}

/// Navigate a dotted path into the output, parsing string outputs as JSON
/// first. Path segments are object keys, or array indices when numeric.
fn extract_json_path(path: &str, raw: &Value) -> Result<Value, ExtractError> {
    let parsed: Value = match raw {
        Value::String(s) => {
            serde_json::from_str(s).map_err(|e| ExtractError::NotJson(e.to_string()))?
        }
        other => other.clone(),
    };

    let mut current = &parsed;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx)),
            _ => None,
        }
        .ok_or_else(|| ExtractError::PathNotFound {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -------------------------------------------------------------------
    // None rule
    // -------------------------------------------------------------------

    #[test]
    fn test_none_stores_raw() {
        let raw = json!("entire output");
        assert_eq!(apply(&ExtractionRule::None, &raw).unwrap(), raw);
    }

    // -------------------------------------------------------------------
    // Regex rule
    // -------------------------------------------------------------------

    #[test]
    fn test_regex_first_capture_group() {
        let rule = ExtractionRule::Regex {
            pattern: r"Answer:\s*(\w+)".to_string(),
        };
        let raw = json!("Reasoning... Answer: yes");
        assert_eq!(apply(&rule, &raw).unwrap(), json!("yes"));
    }

    #[test]
    fn test_regex_no_match_is_error() {
        let rule = ExtractionRule::Regex {
            pattern: r"Score:\s*(\d+)".to_string(),
        };
        let err = apply(&rule, &json!("no score here")).unwrap_err();
        assert!(matches!(err, ExtractError::NoMatch(_)));
    }

    #[test]
    fn test_regex_without_capture_group_is_error() {
        let rule = ExtractionRule::Regex {
            pattern: r"\d+".to_string(),
        };
        let err = apply(&rule, &json!("value 42")).unwrap_err();
        assert!(matches!(err, ExtractError::NoCaptureGroup(_)));
    }

    #[test]
    fn test_regex_bad_pattern_is_error() {
        let rule = ExtractionRule::Regex {
            pattern: "(unclosed".to_string(),
        };
        let err = apply(&rule, &json!("anything")).unwrap_err();
        assert!(matches!(err, ExtractError::BadPattern { .. }));
    }

    // -------------------------------------------------------------------
    // JSON path rule
    // -------------------------------------------------------------------

    #[test]
    fn test_json_path_into_string_output() {
        let rule = ExtractionRule::JsonPath {
            path: "result.title".to_string(),
        };
        let raw = json!(r#"{"result": {"title": "AI Weekly", "score": 9}}"#);
        assert_eq!(apply(&rule, &raw).unwrap(), json!("AI Weekly"));
    }

    #[test]
    fn test_json_path_into_structured_output() {
        let rule = ExtractionRule::JsonPath {
            path: "items.1".to_string(),
        };
        let raw = json!({"items": ["a", "b", "c"]});
        assert_eq!(apply(&rule, &raw).unwrap(), json!("b"));
    }

    #[test]
    fn test_json_path_missing_segment_is_error() {
        let rule = ExtractionRule::JsonPath {
            path: "result.missing".to_string(),
        };
        let raw = json!({"result": {"title": "x"}});
        let err = apply(&rule, &raw).unwrap_err();
        match err {
            ExtractError::PathNotFound { segment, .. } => assert_eq!(segment, "missing"),
            other => panic!("expected PathNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_json_path_unparseable_output_is_error() {
        let rule = ExtractionRule::JsonPath {
            path: "a".to_string(),
        };
        let err = apply(&rule, &json!("not json at all")).unwrap_err();
        assert!(matches!(err, ExtractError::NotJson(_)));
    }
}
