// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod queue_repository;
pub mod time_provider;
pub mod worker_sink;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use queue_repository::QueueRepository;
pub use time_provider::{MonotonicTimeProvider, SystemTimeProvider, TimeProvider};
pub use worker_sink::{ChannelWorkerSink, SinkError, WorkerSink};
