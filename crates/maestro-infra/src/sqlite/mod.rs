//! SQLite-backed repository implementations.

pub mod execution;
pub mod playbook;
pub mod pool;

pub use execution::SqliteExecutionRepository;
pub use playbook::SqlitePlaybookRepository;
pub use pool::DatabasePool;
