// Taskmill Infrastructure - SQLite Adapter
// Implements: QueueRepository

mod connection;
mod migration;
mod queue_repository;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use queue_repository::SqliteQueueRepository;

// Note: sqlx::Error conversion is handled by a helper function
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
