//! Daemon configuration from environment variables

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.taskmill/queues.db";
const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 9530;
const DEFAULT_WORKER_URL: &str = "http://127.0.0.1:9600/jobs";
const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    pub request_timeout: Duration,
    pub worker_url: String,
    pub delivery_timeout: Duration,
    pub sync_interval: Duration,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or empty keys take their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("TASKMILL_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let log_format = match get("TASKMILL_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            db_path: PathBuf::from(shellexpand::tilde(&db_path).into_owned()),
            http_host: get("TASKMILL_HTTP_HOST").unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
            http_port: parse_or(get("TASKMILL_HTTP_PORT"), "TASKMILL_HTTP_PORT", DEFAULT_HTTP_PORT)?,
            request_timeout: Duration::from_secs(parse_or(
                get("TASKMILL_HTTP_REQUEST_TIMEOUT_SECS"),
                "TASKMILL_HTTP_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            worker_url: get("TASKMILL_WORKER_URL").unwrap_or_else(|| DEFAULT_WORKER_URL.to_string()),
            delivery_timeout: Duration::from_millis(parse_or(
                get("TASKMILL_WORKER_DELIVERY_TIMEOUT_MS"),
                "TASKMILL_WORKER_DELIVERY_TIMEOUT_MS",
                DEFAULT_DELIVERY_TIMEOUT_MS,
            )?),
            sync_interval: Duration::from_secs(parse_or(
                get("TASKMILL_SYNC_INTERVAL_SECS"),
                "TASKMILL_SYNC_INTERVAL_SECS",
                DEFAULT_SYNC_INTERVAL_SECS,
            )?),
            shutdown_grace: Duration::from_secs(parse_or(
                get("TASKMILL_SHUTDOWN_GRACE_SECS"),
                "TASKMILL_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            log_format,
            log_dir: get("TASKMILL_LOG_DIR").map(|d| PathBuf::from(shellexpand::tilde(&d).into_owned())),
        })
    }

    /// sqlx connection URL for the database file
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
