// Queue Domain Model

use super::error::{DomainError, Result};
use super::rate_limit::{resolve, EffectiveRate, RateLimit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Queue identifier (unique name within a manager)
pub type QueueName = String;

/// Default time a worker gets before a dispatched job is failed (30s)
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 30_000;

/// Retries allowed before dead-lettering when `max_retries` is left unset
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Ordering policy, fixed for the lifetime of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Fifo,
    Priority,
    Scheduled,
}

impl QueueMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueueMode::Fifo => "fifo",
            QueueMode::Priority => "priority",
            QueueMode::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fifo" => Ok(QueueMode::Fifo),
            "priority" => Ok(QueueMode::Priority),
            "scheduled" => Ok(QueueMode::Scheduled),
            other => Err(DomainError::UnknownMode(other.to_string())),
        }
    }
}

/// Queue lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Idle,
    Active,
    Paused,
    Draining,
    Destroyed,
}

impl QueueState {
    /// Whether `enqueue` is admitted in this state
    pub fn accepts_jobs(self) -> bool {
        matches!(self, QueueState::Active | QueueState::Paused)
    }

    /// Whether the dispatch loop hands out jobs in this state
    pub fn dispatches(self) -> bool {
        matches!(self, QueueState::Active | QueueState::Draining)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Idle => write!(f, "IDLE"),
            QueueState::Active => write!(f, "ACTIVE"),
            QueueState::Paused => write!(f, "PAUSED"),
            QueueState::Draining => write!(f, "DRAINING"),
            QueueState::Destroyed => write!(f, "DESTROYED"),
        }
    }
}

impl FromStr for QueueState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(QueueState::Idle),
            "ACTIVE" => Ok(QueueState::Active),
            "PAUSED" => Ok(QueueState::Paused),
            "DRAINING" => Ok(QueueState::Draining),
            "DESTROYED" => Ok(QueueState::Destroyed),
            other => Err(DomainError::InvalidConfig(format!(
                "unknown queue state '{}'",
                other
            ))),
        }
    }
}

fn default_worker_timeout_ms() -> u64 {
    DEFAULT_WORKER_TIMEOUT_MS
}

fn default_batch_size() -> u32 {
    1
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: QueueName,
    pub mode: QueueMode,
    pub rate_limits: Vec<RateLimit>,

    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default)]
    pub use_dead_letter: bool,

    /// Failed attempts allowed before a job leaves the retry cycle
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub enable_priority: bool,

    #[serde(default)]
    pub enable_scheduling: bool,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, mode: QueueMode, rate_limits: Vec<RateLimit>) -> Self {
        Self {
            name: name.into(),
            mode,
            rate_limits,
            worker_timeout_ms: DEFAULT_WORKER_TIMEOUT_MS,
            batch_size: 1,
            use_dead_letter: false,
            max_retries: None,
            enable_priority: mode == QueueMode::Priority,
            enable_scheduling: mode == QueueMode::Scheduled,
        }
    }

    /// Validate and derive the governing rate
    pub fn validate(&self) -> Result<EffectiveRate> {
        if self.name.trim().is_empty() {
            return Err(invalid("queue name cannot be empty"));
        }
        if self.rate_limits.is_empty() {
            return Err(invalid("at least one rate limit is required"));
        }
        if let Some(limit) = self.rate_limits.iter().find(|l| l.frequency == 0) {
            return Err(invalid(format!(
                "rate limit frequency must be positive (got 0/{})",
                limit.period
            )));
        }
        if self.batch_size < 1 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.worker_timeout_ms == 0 {
            return Err(invalid("worker_timeout_ms must be positive"));
        }
        if self.max_retries == Some(0) {
            return Err(invalid("max_retries must be at least 1 when set"));
        }
        if self.enable_priority && self.mode != QueueMode::Priority {
            return Err(invalid(format!(
                "enable_priority requires mode 'priority' (got '{}')",
                self.mode
            )));
        }
        if self.enable_scheduling && self.mode != QueueMode::Scheduled {
            return Err(invalid(format!(
                "enable_scheduling requires mode 'scheduled' (got '{}')",
                self.mode
            )));
        }

        resolve(&self.rate_limits)
    }

    /// Retry ceiling in effect: `None` means retry forever
    pub fn retry_limit(&self) -> Option<u32> {
        match (self.max_retries, self.use_dead_letter) {
            (Some(n), _) => Some(n),
            (None, true) => Some(DEFAULT_MAX_RETRIES),
            (None, false) => None,
        }
    }

    /// Apply a patch, returning the updated config (not yet validated)
    pub fn patched(&self, patch: &QueueConfigPatch) -> QueueConfig {
        let mut next = self.clone();
        if let Some(limits) = &patch.rate_limits {
            next.rate_limits = limits.clone();
        }
        if let Some(timeout) = patch.worker_timeout_ms {
            next.worker_timeout_ms = timeout;
        }
        if let Some(batch) = patch.batch_size {
            next.batch_size = batch;
        }
        if let Some(dead_letter) = patch.use_dead_letter {
            next.use_dead_letter = dead_letter;
        }
        if let Some(retries) = patch.max_retries {
            next.max_retries = retries;
        }
        next
    }
}

fn invalid(msg: impl Into<String>) -> DomainError {
    DomainError::InvalidConfig(msg.into())
}

/// Fields that may change on a live queue. Mode is fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfigPatch {
    #[serde(default)]
    pub rate_limits: Option<Vec<RateLimit>>,
    #[serde(default)]
    pub worker_timeout_ms: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub use_dead_letter: Option<bool>,
    /// `Some(None)` clears the ceiling
    #[serde(default, with = "double_option")]
    pub max_retries: Option<Option<u32>>,
}

/// Distinguishes an absent field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Option<u32>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u32>::deserialize(deserializer).map(Some)
    }
}

/// Persisted form of a queue: its configuration and last known lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub config: QueueConfig,
    pub state: QueueState,
}
