//! Budget guard port and the default in-process implementation.
//!
//! The cost collaborator is an explicitly injected interface, never a
//! module-level singleton, so tests can substitute a deterministic fake.
//! `check_and_reserve` runs before every LLM call; a denial is a hard stop
//! for that step (never retried, though a configured fallback is honored).
//! `record_usage` notifies the collaborator of actual token consumption.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use maestro_types::llm::TokenUsage;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Denial returned by the budget collaborator.
#[derive(Debug, thiserror::Error)]
#[error("token budget exceeded: {reason}")]
pub struct BudgetDenied {
    pub reason: String,
}

/// Port for the external budget/cost accounting collaborator.
pub trait BudgetGuard: Send + Sync {
    /// Check whether the user may spend roughly `estimated_tokens`, and
    /// reserve them if so.
    fn check_and_reserve(
        &self,
        user_id: Uuid,
        estimated_tokens: u32,
    ) -> impl std::future::Future<Output = Result<(), BudgetDenied>> + Send;

    /// Report actual usage after a successful LLM call.
    fn record_usage(
        &self,
        user_id: Uuid,
        usage: &TokenUsage,
    ) -> impl std::future::Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// StaticBudgetGuard
// ---------------------------------------------------------------------------

/// Process-wide token cap shared across all users.
///
/// Lock-free: reservations use `AtomicU32::fetch_add`. Cloning produces a
/// shared view of the same counter. A limit of `u32::MAX` is effectively
/// unlimited.
#[derive(Debug, Clone)]
pub struct StaticBudgetGuard {
    limit: u32,
    reserved: Arc<AtomicU32>,
    used: Arc<AtomicU32>,
}

impl StaticBudgetGuard {
    /// Create a guard with the given total token limit.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            reserved: Arc::new(AtomicU32::new(0)),
            used: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A guard that never denies.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    /// Tokens actually consumed so far.
    pub fn tokens_used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    /// Tokens reserved so far (estimates, monotonic).
    pub fn tokens_reserved(&self) -> u32 {
        self.reserved.load(Ordering::SeqCst)
    }
}

impl BudgetGuard for StaticBudgetGuard {
    async fn check_and_reserve(
        &self,
        _user_id: Uuid,
        estimated_tokens: u32,
    ) -> Result<(), BudgetDenied> {
        let prev = self.reserved.fetch_add(estimated_tokens, Ordering::SeqCst);
        let new_total = prev.saturating_add(estimated_tokens);
        if new_total > self.limit {
            // Roll the reservation back so a later, smaller step may still fit.
            self.reserved.fetch_sub(estimated_tokens, Ordering::SeqCst);
            return Err(BudgetDenied {
                reason: format!(
                    "reserving {estimated_tokens} tokens would exceed the {} token limit",
                    self.limit
                ),
            });
        }
        Ok(())
    }

    async fn record_usage(&self, _user_id: Uuid, usage: &TokenUsage) {
        self.used.fetch_add(usage.total(), Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_within_limit() {
        let guard = StaticBudgetGuard::new(1000);
        let user = Uuid::now_v7();
        assert!(guard.check_and_reserve(user, 400).await.is_ok());
        assert!(guard.check_and_reserve(user, 600).await.is_ok());
        assert_eq!(guard.tokens_reserved(), 1000);
    }

    #[tokio::test]
    async fn test_denial_over_limit_rolls_back() {
        let guard = StaticBudgetGuard::new(1000);
        let user = Uuid::now_v7();
        assert!(guard.check_and_reserve(user, 800).await.is_ok());
        let denied = guard.check_and_reserve(user, 300).await.unwrap_err();
        assert!(denied.reason.contains("1000"));
        // Rolled back: a smaller reservation still fits
        assert!(guard.check_and_reserve(user, 200).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_usage_accumulates() {
        let guard = StaticBudgetGuard::unlimited();
        let user = Uuid::now_v7();
        guard
            .record_usage(
                user,
                &TokenUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
            )
            .await;
        guard
            .record_usage(
                user,
                &TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            )
            .await;
        assert_eq!(guard.tokens_used(), 135);
    }

    #[tokio::test]
    async fn test_unlimited_never_denies() {
        let guard = StaticBudgetGuard::unlimited();
        let user = Uuid::now_v7();
        assert!(guard.check_and_reserve(user, u32::MAX / 2).await.is_ok());
    }
}
