//! Engine configuration for Maestro.
//!
//! `EngineConfig` controls snapshot truncation, LLM defaults, and the
//! runaway-dispatch guard. All fields have serde defaults so a partial TOML
//! or JSON document deserializes cleanly.

use serde::{Deserialize, Serialize};

/// Tunable engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Byte cap for audit snapshots. Oversized input/output snapshots are
    /// truncated and flagged, never silently dropped.
    #[serde(default = "default_snapshot_limit_bytes")]
    pub snapshot_limit_bytes: usize,

    /// Model used by prompt steps that don't set one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Max output tokens for prompt steps that don't set one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Maximum steps dispatched in one execution. Converts condition-step
    /// cycles into a failed execution instead of spinning forever.
    #[serde(default = "default_max_dispatched_steps")]
    pub max_dispatched_steps: u32,
}

fn default_snapshot_limit_bytes() -> usize {
    65_536
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4_096
}

fn default_max_dispatched_steps() -> u32 {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_limit_bytes: default_snapshot_limit_bytes(),
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            max_dispatched_steps: default_max_dispatched_steps(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.snapshot_limit_bytes, 65_536);
        assert_eq!(config.default_max_tokens, 4_096);
        assert_eq!(config.max_dispatched_steps, 256);
        assert!(config.default_model.starts_with("claude"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("snapshot_limit_bytes = 1024").unwrap();
        assert_eq!(config.snapshot_limit_bytes, 1024);
        assert_eq!(config.default_max_tokens, 4_096);
    }

    #[test]
    fn test_full_toml() {
        let toml_str = r#"
snapshot_limit_bytes = 2048
default_model = "claude-haiku-4"
default_max_tokens = 512
max_dispatched_steps = 16
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_model, "claude-haiku-4");
        assert_eq!(config.max_dispatched_steps, 16);
    }
}
