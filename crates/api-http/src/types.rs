//! REST Request/Response Types

use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskmill_core::application::QueueManager;
use taskmill_core::domain::{
    DomainError, JobId, NewJob, QueueConfig, QueueConfigPatch, QueueMode, RateLimit,
    RateLimitWire,
};

/// Shared application state
pub type AppState = Arc<QueueManager>;

/// Response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Per-request fields merged into every JSON envelope on the way out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    /// Request id, echoed in the `x-request-id` header
    pub call_id: String,
    /// HTTP status of the response
    pub status: u16,
    /// When the request arrived, RFC 3339 UTC
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }
}

fn parse_limits(wire: &[RateLimitWire]) -> Result<Vec<RateLimit>, DomainError> {
    wire.iter().map(RateLimit::from_wire).collect()
}

/// POST /queue
///
/// Rate limits and mode arrive as raw strings so unknown values map to
/// `UNKNOWN_PERIOD` / `INVALID_CONFIG` instead of a generic body rejection.
#[derive(Debug, Deserialize)]
pub struct CreateQueueRequest {
    pub name: String,
    pub mode: String,
    pub rate_limits: Vec<RateLimitWire>,
    #[serde(default)]
    pub worker_timeout_ms: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub use_dead_letter: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub enable_priority: Option<bool>,
    #[serde(default)]
    pub enable_scheduling: Option<bool>,
}

impl CreateQueueRequest {
    pub fn into_config(self) -> Result<QueueConfig, DomainError> {
        let mode: QueueMode = self.mode.parse()?;
        let mut config = QueueConfig::new(self.name, mode, parse_limits(&self.rate_limits)?);
        if let Some(timeout) = self.worker_timeout_ms {
            config.worker_timeout_ms = timeout;
        }
        if let Some(batch) = self.batch_size {
            config.batch_size = batch;
        }
        config.use_dead_letter = self.use_dead_letter;
        config.max_retries = self.max_retries;
        if let Some(flag) = self.enable_priority {
            config.enable_priority = flag;
        }
        if let Some(flag) = self.enable_scheduling {
            config.enable_scheduling = flag;
        }
        Ok(config)
    }
}

/// PATCH /queue
#[derive(Debug, Deserialize)]
pub struct UpdateQueueRequest {
    pub name: String,
    #[serde(default)]
    pub rate_limits: Option<Vec<RateLimitWire>>,
    #[serde(flatten)]
    pub rest: QueueConfigPatch,
}

impl UpdateQueueRequest {
    pub fn into_patch(self) -> Result<(String, QueueConfigPatch), DomainError> {
        let mut patch = self.rest;
        patch.rate_limits = self
            .rate_limits
            .as_deref()
            .map(parse_limits)
            .transpose()?;
        Ok((self.name, patch))
    }
}

/// GET /queue
#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// DELETE /queue
#[derive(Debug, Deserialize)]
pub struct DeleteQueueQuery {
    pub name: String,
    #[serde(default)]
    pub release_name: bool,
}

/// GET /queue/{id}/tasks
#[derive(Debug, Default, Deserialize)]
pub struct TasksQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /task
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub queue: String,
    #[serde(flatten)]
    pub job: NewJob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: JobId,
    pub queue: String,
}

/// POST /tasks
#[derive(Debug, Deserialize)]
pub struct BulkEnqueueRequest {
    pub queue: String,
    pub jobs: Vec<NewJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkEnqueueResponse {
    pub ids: Vec<JobId>,
    pub queue: String,
}

/// Optional owning queue for task routes; located by id when absent
#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub queue: Option<String>,
}

/// POST /task/{id}/fail
#[derive(Debug, Default, Deserialize)]
pub struct FailRequest {
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// DELETE /queue result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResponse {
    pub name: String,
    pub released: bool,
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queues: usize,
}
