//! Observability setup for Maestro.
//!
//! The engine crates emit structured `tracing` events; this crate wires the
//! subscriber for binaries that embed the engine.

pub mod tracing_setup;
