//! Taskmill Daemon - Main Entry Point
//! Wires SQLite persistence, the webhook worker sink and the HTTP API around the queue manager

mod config;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use taskmill_api_http::{HttpServer, HttpServerConfig};
use taskmill_core::application::{shutdown_channel, ConfigSyncScheduler, QueueManager};
use taskmill_core::port::{MonotonicTimeProvider, QueueRepository, SystemTimeProvider, UuidProvider};
use taskmill_infra_sqlite::{create_pool, run_migrations, SqliteQueueRepository};
use taskmill_infra_webhook::WebhookWorkerSink;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = telemetry::init_tracing(&config)?;

    info!("Taskmill v{} starting...", taskmill_core::VERSION);

    // 2. Database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create database dir {}", parent.display()))?;
    }
    info!(db_path = %config.db_path.display(), "Initializing database...");

    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependencies
    let repository: Arc<dyn QueueRepository> =
        Arc::new(SqliteQueueRepository::new(pool.clone(), Arc::new(SystemTimeProvider)));
    let sink = WebhookWorkerSink::new(config.worker_url.clone(), config.delivery_timeout)
        .map_err(|e| anyhow::anyhow!("Worker sink setup failed: {}", e))?;
    info!(worker_url = %sink.url(), "Worker sink configured");

    let manager = Arc::new(QueueManager::new(
        Arc::new(sink),
        Arc::new(MonotonicTimeProvider::new()),
        Arc::new(UuidProvider),
        Some(repository.clone()),
    ));

    // 4. Restore queues saved by a previous run
    let records = repository
        .list()
        .await
        .map_err(|e| anyhow::anyhow!("Loading queue records failed: {}", e))?;
    let total = records.len();
    let restored = manager.restore(records).await;
    info!(restored, total, "Queue configuration restored");

    // 5. Periodic config sync
    let (sync_tx, sync_token) = shutdown_channel();
    let sync = ConfigSyncScheduler::new(manager.clone(), repository, config.sync_interval);
    let sync_handle = tokio::spawn(sync.run(sync_token));

    // 6. HTTP API (blocks until SIGINT or SIGTERM)
    let server = HttpServer::new(
        HttpServerConfig {
            host: config.http_host.clone(),
            port: config.http_port,
            request_timeout: config.request_timeout,
        },
        manager.clone(),
    );

    info!("Press Ctrl+C to shutdown");
    server
        .serve(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // 7. Graceful shutdown: stop dispatch, then persist final state
    if tokio::time::timeout(config.shutdown_grace, manager.shutdown())
        .await
        .is_err()
    {
        warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "Dispatch loops did not stop within grace period"
        );
    }

    sync_tx.shutdown();
    if let Err(e) = sync_handle.await {
        warn!(error = %e, "Config sync task ended abnormally");
    }

    pool.close().await;
    info!("Shutdown complete.");

    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal, "Shutdown signal received. Exiting gracefully...");
}
