// Dispatch Loop - one task per queue

use crate::application::constants::ERROR_RECOVERY_SLEEP_DURATION;
use crate::application::queue::QueueEngine;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{Job, QueueState};
use crate::error::Result;
use crate::port::{QueueRepository, TimeProvider, WorkerSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// A registered queue: its engine behind the queue lock, the wake-up
/// signal its dispatch loop waits on, and the slot that orders record writes
pub(crate) struct QueueHandle {
    pub(crate) name: String,
    pub(crate) engine: Mutex<QueueEngine>,
    pub(crate) wake: Notify,
    pub(crate) write_slot: Mutex<()>,
}

impl QueueHandle {
    pub(crate) fn new(engine: QueueEngine) -> Self {
        Self {
            name: engine.name().to_string(),
            engine: Mutex::new(engine),
            wake: Notify::new(),
            write_slot: Mutex::new(()),
        }
    }
}

/// Shared collaborators of every dispatch loop
pub(crate) struct DispatchContext {
    pub(crate) sink: Arc<dyn WorkerSink>,
    pub(crate) clock: Arc<dyn TimeProvider>,
    pub(crate) repository: Option<Arc<dyn QueueRepository>>,
}

/// Run until the queue neither dispatches nor has jobs in flight, or until
/// shutdown. The caller sets `loop_running` before spawning.
pub(crate) async fn run_dispatch_loop(
    handle: Arc<QueueHandle>,
    ctx: Arc<DispatchContext>,
    mut shutdown: ShutdownToken,
) {
    info!(queue = %handle.name, "Dispatch loop started");

    loop {
        if shutdown.is_shutdown() {
            break;
        }

        let step = {
            let mut engine = handle.engine.lock().await;
            let now = ctx.clock.now_millis();
            let result = engine.tick(now);
            match result {
                Ok(tick) if tick.batch.is_empty() && !engine.needs_loop() => {
                    engine.loop_running = false;
                    info!(queue = %handle.name, state = %engine.state(), "Dispatch loop finished");
                    drop(engine);
                    if tick.drained {
                        persist(&handle, &ctx).await;
                    }
                    return;
                }
                Ok(tick) => Ok((tick, now)),
                Err(e) => Err(e),
            }
        };

        let (tick, now) = match step {
            Ok(step) => step,
            Err(e) => {
                error!(queue = %handle.name, error = %e, "Dispatch tick failed");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
                continue;
            }
        };

        if !tick.batch.is_empty() {
            deliver(&handle, &ctx, tick.batch);
            // More may be ready right away
            tokio::task::yield_now().await;
            continue;
        }

        let wait = tick
            .next_wake
            .map(|at| Duration::from_millis(at.saturating_sub(now).max(0) as u64));
        debug!(queue = %handle.name, wait_ms = ?wait.map(|d| d.as_millis()), "Dispatch loop idle");

        tokio::select! {
            _ = handle.wake.notified() => {},
            _ = idle(wait) => {},
            _ = shutdown.wait() => break,
        }
    }

    handle.engine.lock().await.loop_running = false;
    info!(queue = %handle.name, "Dispatch loop stopped by shutdown");
}

/// Hand each job of a batch to its own delivery task, outside the queue lock,
/// so a slow worker never holds up timeouts or the next batch.
fn deliver(handle: &Arc<QueueHandle>, ctx: &Arc<DispatchContext>, batch: Vec<Job>) {
    for job in batch {
        let handle = Arc::clone(handle);
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move { deliver_one(&handle, &ctx, job).await });
    }
}

/// A refused delivery is reported back as a failed attempt of that dispatch
async fn deliver_one(handle: &QueueHandle, ctx: &DispatchContext, job: Job) {
    debug!(queue = %handle.name, job_id = %job.id, attempts = job.attempts, "Delivering job");
    let Err(e) = ctx.sink.deliver(&job).await else {
        return;
    };
    warn!(queue = %handle.name, job_id = %job.id, error = %e, "Job delivery failed");

    let mut engine = handle.engine.lock().await;
    let now = ctx.clock.now_millis();
    match engine.delivery_failed(&job, e.to_string(), now) {
        Ok(true) => {
            drop(engine);
            handle.wake.notify_one();
        }
        Ok(false) => {
            debug!(queue = %handle.name, job_id = %job.id, "Dispatch already settled, delivery failure ignored");
        }
        Err(e) => {
            error!(queue = %handle.name, job_id = %job.id, error = %e, "Failed to record delivery failure");
        }
    }
}

async fn persist(handle: &QueueHandle, ctx: &DispatchContext) {
    let Some(repo) = &ctx.repository else {
        return;
    };
    if let Err(e) = write_record(handle, repo.as_ref()).await {
        warn!(queue = %handle.name, error = %e, "Failed to persist queue record");
    }
}

/// Store the queue's current record. Writes for one queue are serialized and
/// read the record only once they hold the slot, so the newest state always
/// lands last. Returns false for a destroyed queue, which is never stored.
pub(crate) async fn write_record(handle: &QueueHandle, repo: &dyn QueueRepository) -> Result<bool> {
    let _slot = handle.write_slot.lock().await;
    let record = handle.engine.lock().await.record();
    if record.state == QueueState::Destroyed {
        return Ok(false);
    }
    repo.upsert(&record).await?;
    Ok(true)
}

async fn idle(wait: Option<Duration>) {
    match wait {
        Some(duration) => sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}
