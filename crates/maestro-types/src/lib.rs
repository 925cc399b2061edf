//! Shared domain types for the Maestro playbook engine.
//!
//! This crate contains the core domain types used across the Maestro
//! workspace: playbook definitions, execution records, step log entries,
//! LLM request/response shapes, caller identity, engine configuration,
//! and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod identity;
pub mod llm;
pub mod playbook;
