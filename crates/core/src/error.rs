// Central Error Type for the Application

use crate::domain::{DomainError, JobStatus, QueueState};
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Queue '{0}' already exists")]
    DuplicateQueueName(String),

    #[error("Queue '{0}' not found")]
    QueueNotFound(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Queue '{queue}' cannot go from {from} to {to}")]
    InvalidTransition {
        queue: String,
        from: QueueState,
        to: QueueState,
    },

    #[error("Queue '{queue}' is {state} and does not accept jobs")]
    QueueNotAcceptingJobs { queue: String, state: QueueState },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{id}' is {status} and cannot be cancelled")]
    JobNotCancellable { id: String, status: JobStatus },

    #[error("Unknown rate period: '{0}' (expected second, minute, hour or day)")]
    UnknownPeriod(String),

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DuplicateQueueName(_) => "DUPLICATE_QUEUE_NAME",
            AppError::QueueNotFound(_) => "QUEUE_NOT_FOUND",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::QueueNotAcceptingJobs { .. } => "QUEUE_NOT_ACCEPTING_JOBS",
            AppError::InvalidJob(_) => "INVALID_JOB",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::JobNotCancellable { .. } => "JOB_NOT_CANCELLABLE",
            AppError::UnknownPeriod(_) => "UNKNOWN_PERIOD",
            AppError::Domain(_) => "INVALID_STATE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnknownPeriod(name) => AppError::UnknownPeriod(name),
            DomainError::InvalidConfig(msg) => AppError::InvalidConfig(msg),
            DomainError::UnknownMode(mode) => {
                AppError::InvalidConfig(format!("unknown queue mode '{}'", mode))
            }
            DomainError::InvalidJob(msg) => AppError::InvalidJob(msg),
            other @ DomainError::InvalidStateTransition { .. } => AppError::Domain(other),
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
