// Domain Layer - Queue, job and rate-limit model

pub mod error;
pub mod job;
pub mod pending;
pub mod queue;
pub mod rate_limit;

// Re-exports
pub use error::DomainError;
pub use job::{FailureCause, Job, JobId, JobPatch, JobPayload, JobStatus, NewJob, Priority};
pub use pending::PendingJobs;
pub use queue::{
    QueueConfig, QueueConfigPatch, QueueMode, QueueName, QueueRecord, QueueState,
    DEFAULT_MAX_RETRIES, DEFAULT_WORKER_TIMEOUT_MS,
};
pub use rate_limit::{resolve, EffectiveRate, RateBudget, RateLimit, RateLimitWire, RatePeriod};
