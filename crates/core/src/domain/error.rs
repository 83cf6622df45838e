// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown rate period: '{0}' (expected second, minute, hour or day)")]
    UnknownPeriod(String),

    #[error("Unknown queue mode: '{0}' (expected fifo, priority or scheduled)")]
    UnknownMode(String),

    #[error("Invalid queue config: {0}")]
    InvalidConfig(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
