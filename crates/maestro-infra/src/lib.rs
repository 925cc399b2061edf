//! Infrastructure layer for Maestro.
//!
//! Implements the repository ports defined in `maestro-core` with SQLite
//! (sqlx, split reader/writer pools, WAL mode).

pub mod sqlite;
