//! Per-execution variable store with template rendering.
//!
//! `VariableStore` is the mutable key/value scope that flows through an
//! execution. Keys are unique and insertion-ordered; writes to an existing
//! key overwrite in place (last-write-wins, no versioning). Size limits
//! bound memory growth. Template rendering is strict: an unresolved
//! `{{var}}` reference is an error, handled by the step's error policy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single stored value (1 MB).
pub const MAX_VALUE_SIZE: usize = 1_048_576;

/// Maximum total size of all stored values (10 MB).
pub const MAX_STORE_SIZE: usize = 10_485_760;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from variable store operations.
#[derive(Debug, thiserror::Error)]
pub enum VarError {
    /// A `{{var}}` reference names a variable that doesn't exist.
    #[error("unresolved variable reference: '{0}'")]
    Unresolved(String),

    /// A `{{` without a matching `}}`.
    #[error("unterminated template placeholder at byte {0}")]
    Unterminated(usize),

    /// Total store size exceeded `MAX_STORE_SIZE`.
    #[error("variable store size ({actual} bytes) exceeds maximum ({max} bytes)")]
    StoreOverflow { actual: usize, max: usize },
}

// ---------------------------------------------------------------------------
// VariableStore
// ---------------------------------------------------------------------------

/// Insertion-ordered variable scope for one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<(String, Value)>", from = "Vec<(String, Value)>")]
pub struct VariableStore {
    order: Vec<String>,
    values: HashMap<String, Value>,
}

impl VariableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Read a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether a variable exists.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Write a variable (insert or overwrite).
    ///
    /// Enforces `MAX_VALUE_SIZE` per value: oversized values are replaced
    /// with a truncation marker object rather than stored whole. Enforces
    /// `MAX_STORE_SIZE` in total.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<(), VarError> {
        let serialized_len = serde_json::to_string(&value).map(|s| s.len()).unwrap_or(0);

        let stored = if serialized_len > MAX_VALUE_SIZE {
            tracing::warn!(
                name,
                size = serialized_len,
                max = MAX_VALUE_SIZE,
                "variable value exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": serialized_len,
            })
        } else {
            value
        };

        if !self.values.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.values.insert(name.to_string(), stored);

        let total = self.total_size();
        if total > MAX_STORE_SIZE {
            return Err(VarError::StoreOverflow {
                actual: total,
                max: MAX_STORE_SIZE,
            });
        }
        Ok(())
    }

    /// Iterate variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|name| self.values.get(name).map(|v| (name.as_str(), v)))
    }

    /// Render a `{{var}}` template against the store.
    ///
    /// Placeholders may carry surrounding whitespace (`{{ var }}`). Any
    /// reference to a missing variable is an error; the caller routes it
    /// through the step's error policy.
    pub fn render(&self, template: &str) -> Result<String, VarError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(VarError::Unterminated(template.len() - rest.len() + start));
            };
            let name = after[..end].trim();
            let value = self
                .values
                .get(name)
                .ok_or_else(|| VarError::Unresolved(name.to_string()))?;
            result.push_str(&value_to_string(value));
            rest = &after[end + 2..];
        }
        result.push_str(rest);
        Ok(result)
    }

    /// Build the JSON context object condition expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// { "variables": { "<name>": <value>, ... }, "<name>": <value>, ... }
    /// ```
    ///
    /// Variables are exposed both under the `variables` namespace and, for
    /// convenience, at the top level (a variable literally named
    /// `variables` only appears namespaced).
    pub fn to_expression_context(&self) -> Value {
        let mut vars = serde_json::Map::new();
        let mut root = serde_json::Map::new();
        for (name, value) in self.iter() {
            vars.insert(name.to_string(), value.clone());
            if name != "variables" {
                root.insert(name.to_string(), value.clone());
            }
        }
        root.insert("variables".to_string(), Value::Object(vars));
        Value::Object(root)
    }

    /// Total serialized size of all stored values in bytes.
    pub fn total_size(&self) -> usize {
        self.values
            .values()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    /// Serialize the store to its JSON snapshot form (ordered pairs).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.clone()).unwrap_or(json!([]))
    }

    /// Restore a store from a JSON snapshot.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

impl From<VariableStore> for Vec<(String, Value)> {
    fn from(store: VariableStore) -> Self {
        store
            .order
            .iter()
            .filter_map(|name| store.values.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

impl From<Vec<(String, Value)>> for VariableStore {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        let mut store = VariableStore::new();
        for (name, value) in pairs {
            if !store.values.contains_key(&name) {
                store.order.push(name.clone());
            }
            store.values.insert(name, value);
        }
        store
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to a display string for template substitution.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects/arrays substitute as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_store() -> VariableStore {
        let mut store = VariableStore::new();
        store.insert("doc", json!("hello world")).unwrap();
        store.insert("count", json!(3)).unwrap();
        store.insert("flag", json!(true)).unwrap();
        store
    }

    // -----------------------------------------------------------------------
    // Basic operations
    // -----------------------------------------------------------------------

    #[test]
    fn test_insert_and_get() {
        let store = seeded_store();
        assert_eq!(store.get("doc"), Some(&json!("hello world")));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = seeded_store();
        store.insert("doc", json!("updated")).unwrap();
        assert_eq!(store.get("doc"), Some(&json!("updated")));
        // Overwriting keeps the original position and doesn't duplicate
        assert_eq!(store.len(), 3);
        let names: Vec<&str> = store.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["doc", "count", "flag"]);
    }

    #[test]
    fn test_iteration_preserves_insertion_order() {
        let store = seeded_store();
        let names: Vec<&str> = store.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["doc", "count", "flag"]);
    }

    // -----------------------------------------------------------------------
    // Template rendering
    // -----------------------------------------------------------------------

    #[test]
    fn test_render_single_placeholder() {
        let store = seeded_store();
        assert_eq!(
            store.render("Summarize {{doc}}").unwrap(),
            "Summarize hello world"
        );
    }

    #[test]
    fn test_render_whitespace_and_multiple() {
        let store = seeded_store();
        assert_eq!(
            store.render("{{ doc }} x{{count}} ({{ flag }})").unwrap(),
            "hello world x3 (true)"
        );
    }

    #[test]
    fn test_render_no_placeholders() {
        let store = seeded_store();
        assert_eq!(store.render("plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_render_unresolved_is_error() {
        let store = seeded_store();
        let err = store.render("Hello {{nobody}}").unwrap_err();
        assert!(matches!(err, VarError::Unresolved(name) if name == "nobody"));
    }

    #[test]
    fn test_render_unterminated_is_error() {
        let store = seeded_store();
        let err = store.render("Hello {{doc").unwrap_err();
        assert!(matches!(err, VarError::Unterminated(_)));
    }

    #[test]
    fn test_render_object_value_as_compact_json() {
        let mut store = VariableStore::new();
        store.insert("obj", json!({"a": 1})).unwrap();
        assert_eq!(store.render("v={{obj}}").unwrap(), r#"v={"a":1}"#);
    }

    // -----------------------------------------------------------------------
    // Size limits
    // -----------------------------------------------------------------------

    #[test]
    fn test_oversized_value_truncates() {
        let mut store = VariableStore::new();
        let big = "x".repeat(MAX_VALUE_SIZE + 100);
        store.insert("big", json!(big)).unwrap();

        let stored = store.get("big").unwrap();
        assert_eq!(stored["_truncated"], json!(true));
    }

    // -----------------------------------------------------------------------
    // Snapshot roundtrip
    // -----------------------------------------------------------------------

    #[test]
    fn test_json_snapshot_roundtrip() {
        let store = seeded_store();
        let snapshot = store.to_json();
        let restored = VariableStore::from_json(&snapshot).unwrap();

        assert_eq!(restored.get("doc"), Some(&json!("hello world")));
        let names: Vec<&str> = restored.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["doc", "count", "flag"]);
    }

    // -----------------------------------------------------------------------
    // Expression context
    // -----------------------------------------------------------------------

    #[test]
    fn test_expression_context_shape() {
        let store = seeded_store();
        let ctx = store.to_expression_context();
        assert_eq!(ctx["variables"]["doc"], json!("hello world"));
        assert_eq!(ctx["doc"], json!("hello world"));
        assert_eq!(ctx["variables"]["count"], json!(3));
    }
}
