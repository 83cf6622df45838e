// SQLite QueueRepository Implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use taskmill_core::domain::{DomainError, QueueConfig, QueueMode, QueueRecord, QueueState, RateLimit};
use taskmill_core::error::{AppError, Result};
use taskmill_core::port::{QueueRepository, TimeProvider};
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            Some("5") => AppError::Database(format!(
                "Database locked (SQLITE_BUSY): {}",
                db_err.message()
            )),
            Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
            Some("275") => AppError::Database(format!(
                "Check constraint violation: {}",
                db_err.message()
            )),
            Some(code) => AppError::Database(format!(
                "Database error [{}]: {}",
                code,
                db_err.message()
            )),
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteQueueRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn upsert(&self, record: &QueueRecord) -> Result<()> {
        if record.state == QueueState::Destroyed {
            return Err(AppError::Internal(format!(
                "refusing to store destroyed queue '{}'",
                record.config.name
            )));
        }

        let config = &record.config;
        let rate_limits = serde_json::to_string(&config.rate_limits)
            .map_err(|e| AppError::Internal(format!("rate limits not serializable: {}", e)))?;
        let now = self.time_provider.now_millis();

        sqlx::query(
            r#"
            INSERT INTO queues (
                name, mode, state, rate_limits,
                worker_timeout_ms, batch_size, use_dead_letter, max_retries,
                enable_priority, enable_scheduling,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                rate_limits = excluded.rate_limits,
                worker_timeout_ms = excluded.worker_timeout_ms,
                batch_size = excluded.batch_size,
                use_dead_letter = excluded.use_dead_letter,
                max_retries = excluded.max_retries,
                enable_priority = excluded.enable_priority,
                enable_scheduling = excluded.enable_scheduling,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.name)
        .bind(config.mode.as_str())
        .bind(record.state.to_string())
        .bind(rate_limits)
        .bind(config.worker_timeout_ms as i64)
        .bind(config.batch_size as i64)
        .bind(if config.use_dead_letter { 1 } else { 0 })
        .bind(config.max_retries.map(|n| n as i64))
        .bind(if config.enable_priority { 1 } else { 0 })
        .bind(if config.enable_scheduling { 1 } else { 0 })
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(queue = %config.name, state = %record.state, "Queue record stored");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM queues WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueueRecord>> {
        let rows: Vec<QueueRow> = sqlx::query_as("SELECT * FROM queues ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(QueueRow::into_record).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    name: String,
    mode: String,
    state: String,
    rate_limits: String,
    worker_timeout_ms: i64,
    batch_size: i64,
    use_dead_letter: i32, // SQLite boolean as integer
    max_retries: Option<i64>,
    enable_priority: i32,
    enable_scheduling: i32,
    #[allow(dead_code)]
    created_at: i64,
    #[allow(dead_code)]
    updated_at: i64,
}

impl QueueRow {
    fn into_record(self) -> Result<QueueRecord> {
        let corrupt = |field: &str, detail: String| {
            AppError::Database(format!(
                "corrupt queue record '{}' ({}): {}",
                self.name, field, detail
            ))
        };

        let mode: QueueMode = self
            .mode
            .parse()
            .map_err(|e: DomainError| corrupt("mode", e.to_string()))?;
        let state: QueueState = self
            .state
            .parse()
            .map_err(|e: DomainError| corrupt("state", e.to_string()))?;
        let rate_limits: Vec<RateLimit> = serde_json::from_str(&self.rate_limits)
            .map_err(|e| corrupt("rate_limits", e.to_string()))?;

        Ok(QueueRecord {
            config: QueueConfig {
                name: self.name.clone(),
                mode,
                rate_limits,
                worker_timeout_ms: self.worker_timeout_ms as u64,
                batch_size: self.batch_size as u32,
                use_dead_letter: self.use_dead_letter != 0,
                max_retries: self.max_retries.map(|n| n as u32),
                enable_priority: self.enable_priority != 0,
                enable_scheduling: self.enable_scheduling != 0,
            },
            state,
        })
    }
}
