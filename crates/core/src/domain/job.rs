// Job Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (higher number = dispatched first, priority queues only)
pub type Priority = i32;

/// Job status
///
/// ```text
/// Pending -> Dispatched -> Acked
///               |
///               v
///            Failed -> Pending (retry) | DeadLettered | (terminal Failed)
/// Pending -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Dispatched,
    Acked,
    Failed,
    DeadLettered,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Dispatched => write!(f, "DISPATCHED"),
            JobStatus::Acked => write!(f, "ACKED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::DeadLettered => write!(f, "DEAD_LETTERED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "DISPATCHED" => Ok(JobStatus::Dispatched),
            "ACKED" => Ok(JobStatus::Acked),
            "FAILED" => Ok(JobStatus::Failed),
            "DEAD_LETTERED" => Ok(JobStatus::DeadLettered),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::InvalidJob(format!("unknown job status '{}'", other))),
        }
    }
}

/// Job Payload (opaque JSON handed to the worker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Why a dispatched job failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Worker reported failure
    Reported(String),
    /// Worker sink could not take the job
    Delivery(String),
    /// No outcome before the deadline
    Timeout,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Reported(reason) => write!(f, "worker failure: {}", reason),
            FailureCause::Delivery(reason) => write!(f, "delivery failure: {}", reason),
            FailureCause::Timeout => write!(f, "worker timeout"),
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: JobPayload,

    pub priority: Priority,
    pub scheduled_at: i64, // epoch ms
    pub enqueued_at: i64,  // epoch ms

    pub attempts: u32,
    pub status: JobStatus,

    pub dispatched_at: Option<i64>,
    pub deadline: Option<i64>,
    pub finished_at: Option<i64>,
    pub last_error: Option<String>,

    /// Set when cancellation arrives while the job is with a worker
    #[serde(default)]
    pub cancel_requested: bool,

    /// Enqueue order within the queue, used for stable tie-breaking
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `enqueued_at` - Enqueue timestamp in epoch ms (injected, not system time)
    /// * `queue` - Owning queue name
    /// * `payload` - Job payload
    pub fn new(
        id: impl Into<String>,
        enqueued_at: i64,
        queue: impl Into<String>,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            payload,
            priority: 0,
            scheduled_at: enqueued_at,
            enqueued_at,
            attempts: 0,
            status: JobStatus::Pending,
            dispatched_at: None,
            deadline: None,
            finished_at: None,
            last_error: None,
            cancel_requested: false,
            seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Acked | JobStatus::DeadLettered | JobStatus::Cancelled
        ) || (self.status == JobStatus::Failed && self.finished_at.is_some())
    }

    /// Pending -> Dispatched
    pub fn dispatch(&mut self, now_millis: i64, worker_timeout_ms: u64) -> Result<()> {
        self.expect(JobStatus::Pending, JobStatus::Dispatched)?;
        self.status = JobStatus::Dispatched;
        self.dispatched_at = Some(now_millis);
        self.deadline = Some(now_millis + worker_timeout_ms as i64);
        Ok(())
    }

    /// Dispatched -> Acked
    pub fn ack(&mut self, now_millis: i64) -> Result<()> {
        self.expect(JobStatus::Dispatched, JobStatus::Acked)?;
        self.status = JobStatus::Acked;
        self.deadline = None;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Dispatched -> Failed. Counts the attempt.
    pub fn fail(&mut self, cause: &FailureCause) -> Result<()> {
        self.expect(JobStatus::Dispatched, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.attempts += 1;
        self.deadline = None;
        self.last_error = Some(cause.to_string());
        Ok(())
    }

    /// Failed -> Pending
    pub fn requeue(&mut self) -> Result<()> {
        self.expect_unfinished_failure(JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        self.dispatched_at = None;
        Ok(())
    }

    /// Failed -> DeadLettered
    pub fn dead_letter(&mut self, now_millis: i64) -> Result<()> {
        self.expect_unfinished_failure(JobStatus::DeadLettered)?;
        self.status = JobStatus::DeadLettered;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Failed stays Failed for good
    pub fn discard(&mut self, now_millis: i64) -> Result<()> {
        self.expect_unfinished_failure(JobStatus::Failed)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Pending -> Cancelled
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.expect(JobStatus::Pending, JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    fn expect(&self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn expect_unfinished_failure(&self, to: JobStatus) -> Result<()> {
        if self.status != JobStatus::Failed || self.finished_at.is_some() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

/// Job submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Required, must not be JSON `null`
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Epoch ms; defaults to enqueue time
    #[serde(default)]
    pub scheduled_at: Option<i64>,
}

impl NewJob {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            priority: None,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_at(mut self, at: i64) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Reject missing or null payloads
    pub fn validate(&self) -> Result<()> {
        match &self.payload {
            None | Some(serde_json::Value::Null) => Err(DomainError::InvalidJob(
                "payload is required".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Build the pending job. Call `validate` first.
    pub fn into_job(self, id: JobId, queue: &str, now_millis: i64) -> Job {
        let mut job = Job::new(
            id,
            now_millis,
            queue,
            JobPayload::new(self.payload.unwrap_or(serde_json::Value::Null)),
        );
        job.priority = self.priority.unwrap_or(0);
        job.scheduled_at = self.scheduled_at.unwrap_or(now_millis);
        job
    }
}

/// Re-prioritize or re-schedule a pending job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub scheduled_at: Option<i64>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none() && self.scheduled_at.is_none()
    }
}
