// Queue Manager - registry of named queues and the operation contract

use crate::application::dispatcher::{
    run_dispatch_loop, write_record, DispatchContext, QueueHandle,
};
use crate::application::queue::{QueueEngine, QueueSnapshot};
use crate::application::shutdown::{shutdown_channel, ShutdownSender};
use crate::domain::{
    DomainError, Job, JobId, JobPatch, JobStatus, NewJob, QueueConfig, QueueConfigPatch,
    QueueMode, QueueRecord, QueueState,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, QueueRepository, TimeProvider, WorkerSink};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Criteria for `find_queues`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFilter {
    /// Substring of the queue name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<QueueMode>,
    #[serde(default)]
    pub state: Option<QueueState>,
}

impl QueueFilter {
    fn matches(&self, snapshot: &QueueSnapshot) -> bool {
        self.name
            .as_ref()
            .map_or(true, |n| snapshot.config.name.contains(n.as_str()))
            && self.mode.map_or(true, |m| snapshot.config.mode == m)
            && self.state.map_or(true, |s| snapshot.state == s)
    }
}

#[derive(Default)]
struct Registry {
    queues: HashMap<String, Arc<QueueHandle>>,
    /// Names of destroyed queues not yet released
    reserved: HashSet<String>,
}

/// Owns every queue. Cheap to share behind an `Arc`.
pub struct QueueManager {
    registry: RwLock<Registry>,
    ctx: Arc<DispatchContext>,
    ids: Arc<dyn IdProvider>,
    shutdown: ShutdownSender,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl QueueManager {
    /// Create a manager
    ///
    /// # Arguments
    ///
    /// * `sink` - Where dispatched jobs are delivered
    /// * `clock` - Time source for deadlines, schedules and rate windows
    /// * `ids` - Job id generator
    /// * `repository` - Optional write-through store for queue records
    pub fn new(
        sink: Arc<dyn WorkerSink>,
        clock: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        repository: Option<Arc<dyn QueueRepository>>,
    ) -> Self {
        let (shutdown, _token) = shutdown_channel();
        Self {
            registry: RwLock::new(Registry::default()),
            ctx: Arc::new(DispatchContext {
                sink,
                clock,
                repository,
            }),
            ids,
            shutdown,
            loops: std::sync::Mutex::new(Vec::new()),
        }
    }

    // ---------------------------------------------------------------
    // Queue lifecycle
    // ---------------------------------------------------------------

    /// Register a new Idle queue
    pub async fn create_queue(&self, config: QueueConfig) -> Result<QueueSnapshot> {
        let engine = QueueEngine::new(config)?;
        let name = engine.name().to_string();
        let snapshot = engine.snapshot();
        let handle = Arc::new(QueueHandle::new(engine));

        {
            let mut registry = self.registry.write().await;
            if registry.queues.contains_key(&name) || registry.reserved.contains(&name) {
                return Err(AppError::DuplicateQueueName(name));
            }
            registry.queues.insert(name.clone(), Arc::clone(&handle));
        }

        info!(
            queue = %name,
            mode = %snapshot.config.mode,
            frequency = snapshot.effective_rate.frequency,
            period_ms = snapshot.effective_rate.period_ms,
            "Queue created"
        );
        self.persist(&handle).await;
        Ok(snapshot)
    }

    pub async fn start_queue(&self, name: &str) -> Result<QueueSnapshot> {
        self.apply(name, QueueEngine::start).await
    }

    pub async fn stop_queue(&self, name: &str) -> Result<QueueSnapshot> {
        self.apply(name, QueueEngine::stop).await
    }

    pub async fn pause_queue(&self, name: &str) -> Result<QueueSnapshot> {
        self.apply(name, QueueEngine::pause).await
    }

    pub async fn unpause_queue(&self, name: &str) -> Result<QueueSnapshot> {
        self.apply(name, QueueEngine::unpause).await
    }

    pub async fn drain_queue(&self, name: &str) -> Result<QueueSnapshot> {
        self.apply(name, QueueEngine::drain).await
    }

    /// Change rate limits, batch size, timeout or retry settings of a live queue
    pub async fn update_queue(&self, name: &str, patch: QueueConfigPatch) -> Result<QueueSnapshot> {
        self.apply(name, |engine| engine.update_config(&patch)).await
    }

    /// Remove a queue. Its name stays reserved unless `release_name` is set.
    pub async fn destroy_queue(&self, name: &str, release_name: bool) -> Result<QueueSnapshot> {
        let handle = {
            let mut registry = self.registry.write().await;
            let handle = registry
                .queues
                .remove(name)
                .ok_or_else(|| AppError::QueueNotFound(name.to_string()))?;
            if !release_name {
                registry.reserved.insert(name.to_string());
            }
            handle
        };

        let (outcome, snapshot) = {
            let mut engine = handle.engine.lock().await;
            let outcome = engine.destroy(self.ctx.clock.now_millis())?;
            handle.wake.notify_one();
            (outcome, engine.snapshot())
        };

        info!(
            queue = %name,
            cancelled = outcome.cancelled,
            abandoned = outcome.abandoned,
            name_reserved = !release_name,
            "Queue destroyed"
        );

        if let Some(repo) = &self.ctx.repository {
            let _slot = handle.write_slot.lock().await;
            if let Err(e) = repo.delete(name).await {
                warn!(queue = %name, error = %e, "Failed to delete queue record");
            }
        }
        Ok(snapshot)
    }

    /// Make a destroyed queue's name available again. Returns whether it was reserved.
    pub async fn release_queue_name(&self, name: &str) -> bool {
        let released = self.registry.write().await.reserved.remove(name);
        if released {
            info!(queue = %name, "Queue name released");
        }
        released
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    pub async fn enqueue_job(&self, queue: &str, job: NewJob) -> Result<JobId> {
        let mut ids = self.enqueue_jobs(queue, vec![job]).await?;
        ids.pop()
            .ok_or_else(|| AppError::Internal("enqueue returned no id".to_string()))
    }

    /// Validate every job, then admit all of them or none
    pub async fn enqueue_jobs(&self, queue: &str, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
        let handle = self.handle(queue).await?;

        if jobs.is_empty() {
            return Err(AppError::InvalidJob("at least one job is required".to_string()));
        }
        for (index, job) in jobs.iter().enumerate() {
            if let Err(DomainError::InvalidJob(msg)) = job.validate() {
                return Err(AppError::InvalidJob(format!("job #{}: {}", index, msg)));
            }
        }

        let mut engine = handle.engine.lock().await;
        let now = self.ctx.clock.now_millis();
        let jobs: Vec<Job> = jobs
            .into_iter()
            .map(|job| job.into_job(self.ids.generate_id(), queue, now))
            .collect();
        let ids: Vec<JobId> = jobs.iter().map(|job| job.id.clone()).collect();

        engine.enqueue(jobs)?;
        self.ensure_dispatching(&handle, &mut engine);
        info!(queue = %queue, count = ids.len(), pending = engine.pending_len(), "Jobs enqueued");
        Ok(ids)
    }

    /// Cancel a pending job; a dispatched one is only flagged
    pub async fn cancel_job(&self, queue: &str, id: &str) -> Result<Job> {
        self.with_job(queue, |engine, now| engine.cancel(id, now)).await
    }

    /// Worker outcome: success
    pub async fn ack_job(&self, queue: &str, id: &str) -> Result<Job> {
        self.with_job(queue, |engine, now| engine.ack(id, now)).await
    }

    /// Worker outcome: failure
    pub async fn fail_job(&self, queue: &str, id: &str, reason: &str) -> Result<Job> {
        self.with_job(queue, |engine, now| engine.fail(id, reason, now))
            .await
    }

    /// Name of the queue currently holding a job
    pub async fn locate_job(&self, id: &str) -> Result<String> {
        for handle in self.handles().await {
            if handle.engine.lock().await.contains(id) {
                return Ok(handle.name.clone());
            }
        }
        Err(AppError::JobNotFound(id.to_string()))
    }

    pub async fn find_job(&self, id: &str) -> Result<Job> {
        for handle in self.handles().await {
            if let Some(job) = handle.engine.lock().await.find_job(id) {
                return Ok(job);
            }
        }
        Err(AppError::JobNotFound(id.to_string()))
    }

    /// Re-prioritize or re-schedule a pending job
    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        if patch.is_empty() {
            return Err(AppError::InvalidJob(
                "patch must set priority or scheduled_at".to_string(),
            ));
        }
        let queue = self.locate_job(id).await?;
        self.with_job(&queue, |engine, _| engine.update_job(id, &patch))
            .await
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub async fn get_queue(&self, name: &str) -> Result<QueueSnapshot> {
        let handle = self.handle(name).await?;
        let snapshot = handle.engine.lock().await.snapshot();
        Ok(snapshot)
    }

    /// All queues ordered by name
    pub async fn list_queues(&self) -> Vec<QueueSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.handles().await {
            snapshots.push(handle.engine.lock().await.snapshot());
        }
        snapshots
    }

    pub async fn find_queues(&self, filter: &QueueFilter) -> Vec<QueueSnapshot> {
        self.list_queues()
            .await
            .into_iter()
            .filter(|snapshot| filter.matches(snapshot))
            .collect()
    }

    /// Jobs retained by a queue, optionally of one status
    pub async fn get_queue_tasks(&self, name: &str, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let handle = self.handle(name).await?;
        let tasks = handle.engine.lock().await.tasks(status);
        Ok(tasks)
    }

    // ---------------------------------------------------------------
    // Persistence & shutdown
    // ---------------------------------------------------------------

    /// Current record of every queue, ordered by name
    pub async fn records(&self) -> Vec<QueueRecord> {
        let mut records = Vec::new();
        for handle in self.handles().await {
            records.push(handle.engine.lock().await.record());
        }
        records
    }

    /// Write every queue's current record to `repository` and delete records
    /// of queues that no longer exist. Returns the number of records written.
    pub async fn sync_records(&self, repository: &dyn QueueRepository) -> Result<usize> {
        let mut written = 0;
        for handle in self.handles().await {
            if write_record(&handle, repository).await? {
                written += 1;
            }
        }

        for stored in repository.list().await? {
            let name = stored.config.name;
            if self.handle(&name).await.is_ok() {
                continue;
            }
            repository.delete(&name).await?;
            // Created while the delete was in flight
            if let Ok(handle) = self.handle(&name).await {
                write_record(&handle, repository).await?;
            }
        }
        Ok(written)
    }

    /// Recreate queues from stored records and re-apply their lifecycle state.
    /// Records that cannot be restored are logged and skipped.
    pub async fn restore(&self, records: Vec<QueueRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let name = record.config.name.clone();
            match self.restore_one(record).await {
                Ok(snapshot) => {
                    info!(queue = %name, state = %snapshot.state, "Queue restored");
                    restored += 1;
                }
                Err(e) => warn!(queue = %name, error = %e, "Failed to restore queue"),
            }
        }
        restored
    }

    async fn restore_one(&self, record: QueueRecord) -> Result<QueueSnapshot> {
        let name = record.config.name.clone();
        let snapshot = self.create_queue(record.config).await?;
        match record.state {
            QueueState::Idle => Ok(snapshot),
            QueueState::Active => self.start_queue(&name).await,
            QueueState::Paused => {
                self.start_queue(&name).await?;
                self.pause_queue(&name).await
            }
            QueueState::Draining => {
                self.start_queue(&name).await?;
                self.drain_queue(&name).await
            }
            QueueState::Destroyed => {
                self.destroy_queue(&name, true).await?;
                Err(AppError::InvalidConfig(format!(
                    "queue '{}' was stored as destroyed",
                    name
                )))
            }
        }
    }

    /// Stop every dispatch loop and wait for them to exit
    pub async fn shutdown(&self) {
        info!("Stopping dispatch loops");
        self.shutdown.shutdown();
        let loops: Vec<JoinHandle<()>> = {
            let mut guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in loops {
            if let Err(e) = task.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    async fn handle(&self, name: &str) -> Result<Arc<QueueHandle>> {
        self.registry
            .read()
            .await
            .queues
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::QueueNotFound(name.to_string()))
    }

    /// Registered handles ordered by name, without holding the registry lock
    async fn handles(&self) -> Vec<Arc<QueueHandle>> {
        let mut handles: Vec<Arc<QueueHandle>> =
            self.registry.read().await.queues.values().cloned().collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Run a lifecycle operation, then write the new record through
    async fn apply<F>(&self, name: &str, op: F) -> Result<QueueSnapshot>
    where
        F: FnOnce(&mut QueueEngine) -> Result<()>,
    {
        let handle = self.handle(name).await?;
        let snapshot = {
            let mut engine = handle.engine.lock().await;
            op(&mut engine)?;
            self.ensure_dispatching(&handle, &mut engine);
            engine.snapshot()
        };
        self.persist(&handle).await;
        Ok(snapshot)
    }

    /// Run a job operation and let the dispatch loop react to it
    async fn with_job<F>(&self, queue: &str, op: F) -> Result<Job>
    where
        F: FnOnce(&mut QueueEngine, i64) -> Result<Job>,
    {
        let handle = self.handle(queue).await?;
        let mut engine = handle.engine.lock().await;
        let job = op(&mut engine, self.ctx.clock.now_millis())?;
        self.ensure_dispatching(&handle, &mut engine);
        Ok(job)
    }

    /// Wake the queue's loop, spawning one if the queue needs it and none runs.
    /// Called with the queue lock held so `loop_running` cannot race the loop's exit.
    fn ensure_dispatching(&self, handle: &Arc<QueueHandle>, engine: &mut QueueEngine) {
        if engine.loop_running {
            handle.wake.notify_one();
            return;
        }
        if !engine.needs_loop() || self.shutdown.is_shutdown() {
            return;
        }

        engine.loop_running = true;
        let task = tokio::spawn(run_dispatch_loop(
            Arc::clone(handle),
            Arc::clone(&self.ctx),
            self.shutdown.token(),
        ));
        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        loops.retain(|task| !task.is_finished());
        loops.push(task);
    }

    async fn persist(&self, handle: &QueueHandle) {
        let Some(repo) = &self.ctx.repository else {
            return;
        };
        if let Err(e) = write_record(handle, repo.as_ref()).await {
            warn!(queue = %handle.name, error = %e, "Failed to persist queue record");
        }
    }
}
