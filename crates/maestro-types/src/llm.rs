//! LLM request/response types for Maestro.
//!
//! The engine only consumes the non-streaming completion surface: it renders
//! a prompt, sends one request, and stores the returned text. Provider
//! implementations live outside this workspace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to the LLM collaborator for a single completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

/// Response from the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Token usage for a completion, reported to the budget collaborator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total tokens consumed by the request.
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Errors from the LLM collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider API error: {0}")]
    Api(String),

    #[error("provider rate limited")]
    RateLimited,

    #[error("provider request timed out")]
    Timeout,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// A prompt template supplied by the prompt store collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub name: String,
    /// Template text with `{{var}}` placeholders.
    pub text: String,
}
