//! LLM and prompt-store collaborator ports.
//!
//! The engine never talks HTTP. Prompt steps go through `LlmClient`, a
//! narrow completion interface the embedding application implements (and
//! retries/rate-limits externally). Prompt templates referenced by ID are
//! resolved through `PromptStore`, a read-only lookup.
//!
//! Both traits use native async fn in traits (RPITIT, Rust 2024 edition).

use maestro_types::error::RepositoryError;
use maestro_types::llm::{LlmError, LlmRequest, LlmResponse, PromptTemplate};
use uuid::Uuid;

/// Port for the external LLM provider client.
pub trait LlmClient: Send + Sync {
    /// Execute one completion request.
    fn execute(
        &self,
        request: &LlmRequest,
    ) -> impl std::future::Future<Output = Result<LlmResponse, LlmError>> + Send;
}

/// Port for the external prompt/collection store.
pub trait PromptStore: Send + Sync {
    /// Look up a prompt template by ID.
    fn get(
        &self,
        prompt_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<PromptTemplate>, RepositoryError>> + Send;
}
