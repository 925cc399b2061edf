//! Condition expression evaluation for branch steps.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of pre-registered string
//! transforms and coerces results to boolean. Variable values are always
//! passed as a context object, never interpolated into the expression
//! string.
//!
//! Evaluators are cheap to build and are created at the evaluation site
//! (they hold non-`Send` boxed closures, so they must never live across an
//! await point).

use serde_json::{Value, json};

use crate::vars::VariableStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from condition evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("condition evaluation failed: {0}")]
    EvalFailed(String),
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a condition expression against a variable store.
///
/// The context exposes each variable at the top level and under the
/// `variables` namespace (see `VariableStore::to_expression_context`).
/// Malformed expressions surface here, at dispatch time.
pub fn evaluate(expression: &str, store: &VariableStore) -> Result<bool, ConditionError> {
    let context = store.to_expression_context();
    evaluate_in(expression, &context)
}

/// Evaluate a condition expression against an explicit JSON context.
pub fn evaluate_in(expression: &str, context: &Value) -> Result<bool, ConditionError> {
    let evaluator = build_evaluator();
    let result = evaluator
        .eval_in_context(expression, context)
        .map_err(|e| ConditionError::EvalFailed(e.to_string()))?;
    Ok(value_to_bool(&result))
}

/// Build a jexl evaluator with the engine's standard transforms.
fn build_evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("trim", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.trim()))
        })
        .with_transform("contains", |args: &[Value]| {
            let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(subject.contains(search)))
        })
        .with_transform("length", |args: &[Value]| {
            let val = args.first().cloned().unwrap_or(Value::Null);
            let len = match &val {
                Value::String(s) => s.len(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("not", |args: &[Value]| {
            let val = args.first().cloned().unwrap_or(Value::Null);
            Ok(json!(!value_to_bool(&val)))
        })
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
