// Application Layer - Queue engine, dispatch loops and the manager

pub mod config_sync;
pub mod constants;
mod dispatcher;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod shutdown;

// Re-exports
pub use config_sync::ConfigSyncScheduler;
pub use manager::{QueueFilter, QueueManager};
pub use queue::{DestroyOutcome, QueueEngine, QueueSnapshot, QueueStats, Tick};
pub use retry::{RetryDecision, RetryPolicy};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
