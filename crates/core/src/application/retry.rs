// Retry policy - what happens to a job after a failed attempt
use crate::domain::{Job, QueueConfig};
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending for another attempt
    Retry,
    /// Out of attempts, keep it in the dead-letter store
    DeadLetter,
    /// Out of attempts, no dead-letter store: stays Failed
    Discard,
}

/// Retry policy derived from a queue's config
///
/// - `max_retries` set: retry while `attempts < max_retries`
/// - `max_retries` unset with dead-lettering: ceiling of `DEFAULT_MAX_RETRIES`
/// - `max_retries` unset without dead-lettering: retry forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: Option<u32>,
    use_dead_letter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            limit: config.retry_limit(),
            use_dead_letter: config.use_dead_letter,
        }
    }

    /// Decide the fate of a job whose failed attempt was already counted
    pub fn decide(&self, job: &Job) -> RetryDecision {
        let Some(limit) = self.limit else {
            info!(job_id = %job.id, attempts = job.attempts, "Retrying job (unbounded)");
            return RetryDecision::Retry;
        };

        if job.attempts < limit {
            info!(
                job_id = %job.id,
                attempts = job.attempts,
                max_retries = limit,
                "Retrying job"
            );
            return RetryDecision::Retry;
        }

        warn!(
            job_id = %job.id,
            attempts = job.attempts,
            max_retries = limit,
            dead_letter = self.use_dead_letter,
            "Max retry attempts reached"
        );
        if self.use_dead_letter {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Discard
        }
    }
}
