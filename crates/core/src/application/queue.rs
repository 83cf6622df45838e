// Queue Engine - lifecycle, job stores and one dispatch tick
//
// Pure state: every method takes `now` and performs no I/O, so the dispatch
// loop can call it under the queue lock and hand the result to the sink after.

use crate::application::constants::HISTORY_CAPACITY;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    EffectiveRate, FailureCause, Job, JobId, JobPatch, JobStatus, PendingJobs, QueueConfig,
    QueueConfigPatch, QueueRecord, QueueState, RateBudget,
};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Per-queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub acked: u64,
    /// Reported and delivery failures
    pub failed: u64,
    pub timed_out: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,
}

/// Read-only view of a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub config: QueueConfig,
    pub state: QueueState,
    pub effective_rate: EffectiveRate,
    pub pending: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
    pub stats: QueueStats,
}

/// Result of one dispatch tick
#[derive(Debug, Default)]
pub struct Tick {
    /// Jobs moved to Dispatched, to hand to the worker sink
    pub batch: Vec<Job>,
    /// Ids failed by the timeout sweep
    pub timed_out: Vec<JobId>,
    /// The queue finished draining and is now Idle
    pub drained: bool,
    /// Earliest instant more work may become possible
    pub next_wake: Option<i64>,
}

/// What `destroy` threw away
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOutcome {
    pub cancelled: usize,
    pub abandoned: usize,
}

#[derive(Debug)]
pub struct QueueEngine {
    config: QueueConfig,
    state: QueueState,
    budget: RateBudget,
    retry: RetryPolicy,
    pending: PendingJobs,
    in_flight: HashMap<JobId, Job>,
    dead_letter: Vec<Job>,
    history: VecDeque<Job>,
    stats: QueueStats,
    /// Whether a dispatch loop task currently owns this queue
    pub(crate) loop_running: bool,
}

impl QueueEngine {
    /// Validate the config and create an Idle queue
    pub fn new(config: QueueConfig) -> Result<Self> {
        let rate = config.validate()?;
        Ok(Self {
            budget: RateBudget::new(rate),
            retry: RetryPolicy::from_config(&config),
            pending: PendingJobs::new(config.mode),
            config,
            state: QueueState::Idle,
            in_flight: HashMap::new(),
            dead_letter: Vec::new(),
            history: VecDeque::new(),
            stats: QueueStats::default(),
            loop_running: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            config: self.config.clone(),
            state: self.state,
            effective_rate: self.budget.rate(),
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            dead_lettered: self.dead_letter.len(),
            stats: self.stats,
        }
    }

    pub fn record(&self) -> QueueRecord {
        QueueRecord {
            config: self.config.clone(),
            state: self.state,
        }
    }

    /// A dispatch loop is needed to hand out jobs or to time out in-flight ones
    pub fn needs_loop(&self) -> bool {
        self.state.dispatches() || !self.in_flight.is_empty()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Idle -> Active
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[QueueState::Idle], QueueState::Active)
    }

    /// Active | Paused | Draining -> Idle. Pending jobs are kept.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(
            &[QueueState::Active, QueueState::Paused, QueueState::Draining],
            QueueState::Idle,
        )
    }

    /// Active -> Paused
    pub fn pause(&mut self) -> Result<()> {
        self.transition(&[QueueState::Active], QueueState::Paused)
    }

    /// Paused -> Active
    pub fn unpause(&mut self) -> Result<()> {
        self.transition(&[QueueState::Paused], QueueState::Active)
    }

    /// Active | Paused -> Draining. An already empty queue goes straight to Idle.
    pub fn drain(&mut self) -> Result<()> {
        self.transition(
            &[QueueState::Active, QueueState::Paused],
            QueueState::Draining,
        )?;
        self.settle_drain();
        Ok(())
    }

    /// Any live state -> Destroyed. Pending jobs are cancelled, in-flight
    /// jobs are abandoned: later outcomes for them find nothing.
    pub fn destroy(&mut self, now: i64) -> Result<DestroyOutcome> {
        self.transition(
            &[
                QueueState::Idle,
                QueueState::Active,
                QueueState::Paused,
                QueueState::Draining,
            ],
            QueueState::Destroyed,
        )?;

        let mut outcome = DestroyOutcome::default();
        for mut job in self.pending.drain_all() {
            job.cancel(now)?;
            outcome.cancelled += 1;
        }
        outcome.abandoned = self.in_flight.len();
        self.in_flight.clear();
        self.stats.cancelled += outcome.cancelled as u64;
        Ok(outcome)
    }

    fn transition(&mut self, allowed: &[QueueState], to: QueueState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(AppError::InvalidTransition {
                queue: self.config.name.clone(),
                from: self.state,
                to,
            });
        }
        info!(queue = %self.config.name, from = %self.state, to = %to, "Queue state changed");
        self.state = to;
        Ok(())
    }

    fn settle_drain(&mut self) -> bool {
        if self.state == QueueState::Draining
            && self.pending.is_empty()
            && self.in_flight.is_empty()
        {
            info!(queue = %self.config.name, "Queue drained");
            self.state = QueueState::Idle;
            return true;
        }
        false
    }

    /// Apply a live config change and recompute the effective rate
    pub fn update_config(&mut self, patch: &QueueConfigPatch) -> Result<()> {
        let next = self.config.patched(patch);
        let rate = next.validate()?;
        self.budget.set_rate(rate);
        self.retry = RetryPolicy::from_config(&next);
        self.config = next;
        info!(
            queue = %self.config.name,
            frequency = rate.frequency,
            period_ms = rate.period_ms,
            batch_size = self.config.batch_size,
            "Queue config updated"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    /// Admit jobs atomically: either all are queued or none
    pub fn enqueue(&mut self, jobs: Vec<Job>) -> Result<()> {
        if !self.state.accepts_jobs() {
            return Err(AppError::QueueNotAcceptingJobs {
                queue: self.config.name.clone(),
                state: self.state,
            });
        }
        if let Some(dup) = jobs.iter().find(|job| self.contains(&job.id)) {
            return Err(AppError::Internal(format!(
                "job id collision in queue '{}': {}",
                self.config.name, dup.id
            )));
        }

        for job in jobs {
            debug!(queue = %self.config.name, job_id = %job.id, priority = job.priority, "Job enqueued");
            self.pending.push(job);
            self.stats.enqueued += 1;
        }
        Ok(())
    }

    /// Cancel a pending job, or flag a dispatched one
    pub fn cancel(&mut self, id: &str, now: i64) -> Result<Job> {
        if let Some(mut job) = self.pending.remove(id) {
            job.cancel(now)?;
            self.stats.cancelled += 1;
            info!(queue = %self.config.name, job_id = %id, "Job cancelled");
            self.push_history(job.clone());
            return Ok(job);
        }

        if let Some(job) = self.in_flight.get_mut(id) {
            job.cancel_requested = true;
            info!(queue = %self.config.name, job_id = %id, "Cancellation requested for dispatched job");
            return Ok(job.clone());
        }

        match self.find_finished(id) {
            Some(job) => Err(AppError::JobNotCancellable {
                id: id.to_string(),
                status: job.status,
            }),
            None => Err(AppError::JobNotFound(id.to_string())),
        }
    }

    /// Worker reported success
    pub fn ack(&mut self, id: &str, now: i64) -> Result<Job> {
        let Some(mut job) = self.in_flight.remove(id) else {
            return Err(self.not_in_flight(id, JobStatus::Acked));
        };
        job.ack(now)?;
        self.stats.acked += 1;
        info!(queue = %self.config.name, job_id = %id, attempts = job.attempts, "Job acked");
        self.push_history(job.clone());
        Ok(job)
    }

    /// Worker reported failure
    pub fn fail(&mut self, id: &str, reason: impl Into<String>, now: i64) -> Result<Job> {
        let Some(job) = self.in_flight.remove(id) else {
            return Err(self.not_in_flight(id, JobStatus::Failed));
        };
        self.settle_failure(job, FailureCause::Reported(reason.into()), now)
    }

    /// The sink could not take a dispatched job. Returns false and changes
    /// nothing when that dispatch already left flight: acked, timed out, or
    /// superseded by a later attempt of the same job.
    pub fn delivery_failed(&mut self, dispatched: &Job, reason: impl Into<String>, now: i64) -> Result<bool> {
        let current = self
            .in_flight
            .get(&dispatched.id)
            .is_some_and(|job| job.attempts == dispatched.attempts);
        if !current {
            return Ok(false);
        }
        if let Some(job) = self.in_flight.remove(&dispatched.id) {
            self.settle_failure(job, FailureCause::Delivery(reason.into()), now)?;
        }
        Ok(true)
    }

    fn not_in_flight(&self, id: &str, to: JobStatus) -> AppError {
        let known = self
            .pending
            .get(id)
            .map(|job| job.status)
            .or_else(|| self.find_finished(id).map(|job| job.status));
        match known {
            Some(from) => AppError::Domain(crate::domain::DomainError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
            None => AppError::JobNotFound(id.to_string()),
        }
    }

    fn settle_failure(&mut self, mut job: Job, cause: FailureCause, now: i64) -> Result<Job> {
        job.fail(&cause)?;
        if cause == FailureCause::Timeout {
            self.stats.timed_out += 1;
        } else {
            self.stats.failed += 1;
        }
        warn!(
            queue = %self.config.name,
            job_id = %job.id,
            attempts = job.attempts,
            cause = %cause,
            "Job attempt failed"
        );

        if job.cancel_requested {
            job.discard(now)?;
            self.stats.cancelled += 1;
            self.push_history(job.clone());
            return Ok(job);
        }

        match self.retry.decide(&job) {
            RetryDecision::Retry => {
                job.requeue()?;
                self.stats.retried += 1;
                self.pending.push(job.clone());
            }
            RetryDecision::DeadLetter => {
                job.dead_letter(now)?;
                self.stats.dead_lettered += 1;
                self.dead_letter.push(job.clone());
            }
            RetryDecision::Discard => {
                job.discard(now)?;
                self.push_history(job.clone());
            }
        }
        Ok(job)
    }

    /// Re-prioritize or re-schedule a pending job
    pub fn update_job(&mut self, id: &str, patch: &JobPatch) -> Result<Job> {
        if self.pending.reorder(id, patch.priority, patch.scheduled_at) {
            return self
                .pending
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::Internal(format!("job {} lost during reorder", id)));
        }
        match self.find_job(id) {
            Some(job) => Err(AppError::InvalidJob(format!(
                "job '{}' is {}; only pending jobs can be updated",
                id, job.status
            ))),
            None => Err(AppError::JobNotFound(id.to_string())),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains(id) || self.in_flight.contains_key(id) || self.find_finished(id).is_some()
    }

    pub fn find_job(&self, id: &str) -> Option<Job> {
        self.pending
            .get(id)
            .or_else(|| self.in_flight.get(id))
            .or_else(|| self.find_finished(id))
            .cloned()
    }

    fn find_finished(&self, id: &str) -> Option<&Job> {
        self.dead_letter
            .iter()
            .find(|job| job.id == id)
            .or_else(|| self.history.iter().rev().find(|job| job.id == id))
    }

    /// All retained jobs: pending in dispatch order, in-flight by dispatch
    /// time, then dead-lettered and finished ones
    pub fn tasks(&self, status: Option<JobStatus>) -> Vec<Job> {
        let mut in_flight: Vec<&Job> = self.in_flight.values().collect();
        in_flight.sort_by_key(|job| (job.dispatched_at, job.seq));

        self.pending
            .iter()
            .chain(in_flight)
            .chain(self.dead_letter.iter())
            .chain(self.history.iter())
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect()
    }

    fn push_history(&mut self, job: Job) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(job);
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    /// One dispatch step: time out overdue jobs, hand out what the rate
    /// budget allows, settle a finished drain.
    pub fn tick(&mut self, now: i64) -> Result<Tick> {
        let timed_out = self.sweep_timeouts(now)?;

        let mut batch = Vec::new();
        if self.state.dispatches() {
            let slots = self.budget.available(now).min(self.config.batch_size) as usize;
            if slots > 0 {
                for mut job in self.pending.take_ready(now, slots) {
                    job.dispatch(now, self.config.worker_timeout_ms)?;
                    self.in_flight.insert(job.id.clone(), job.clone());
                    batch.push(job);
                }
                self.budget.consume(now, batch.len() as u32);
                self.stats.dispatched += batch.len() as u64;
                if !batch.is_empty() {
                    debug!(queue = %self.config.name, count = batch.len(), "Dispatched batch");
                }
            }
        }

        let drained = self.settle_drain();
        let next_wake = self.next_wake(now);
        Ok(Tick {
            batch,
            timed_out,
            drained,
            next_wake,
        })
    }

    fn sweep_timeouts(&mut self, now: i64) -> Result<Vec<JobId>> {
        let mut overdue: Vec<(i64, u64, JobId)> = self
            .in_flight
            .values()
            .filter(|job| job.deadline.is_some_and(|d| d <= now))
            .map(|job| (job.deadline.unwrap_or(now), job.seq, job.id.clone()))
            .collect();
        overdue.sort();

        let mut ids = Vec::with_capacity(overdue.len());
        for (_, _, id) in overdue {
            if let Some(job) = self.in_flight.remove(&id) {
                warn!(queue = %self.config.name, job_id = %id, "Worker timeout");
                self.settle_failure(job, FailureCause::Timeout, now)?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Earliest instant at which a tick could make progress
    pub fn next_wake(&mut self, now: i64) -> Option<i64> {
        let mut wake: Option<i64> = self.in_flight.values().filter_map(|job| job.deadline).min();

        if self.state.dispatches() && !self.pending.is_empty() {
            let dispatch_at = if self.pending.ready_count(now) > 0 {
                if self.budget.available(now) > 0 {
                    Some(now)
                } else {
                    self.budget.next_refill_at()
                }
            } else {
                self.pending.next_due_at(now)
            };
            wake = match (wake, dispatch_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewJob, QueueMode, RateLimit};
    use tokio_test::{assert_err, assert_ok};

    fn engine(mode: QueueMode, limit: RateLimit) -> QueueEngine {
        QueueEngine::new(QueueConfig::new("q", mode, vec![limit])).unwrap()
    }

    fn active(mode: QueueMode, limit: RateLimit) -> QueueEngine {
        let mut engine = engine(mode, limit);
        engine.start().unwrap();
        engine
    }

    fn job(id: &str, now: i64) -> Job {
        NewJob::new(serde_json::json!({"id": id})).into_job(id.into(), "q", now)
    }

    fn ids(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.id.as_str()).collect()
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut q = engine(QueueMode::Fifo, RateLimit::per_second(1));
        assert_eq!(q.state(), QueueState::Idle);
        assert_err!(q.pause());
        assert_ok!(q.start());
        assert_err!(q.start());
        assert_ok!(q.pause());
        assert_err!(q.pause());
        assert_ok!(q.unpause());
        assert_ok!(q.stop());
        assert_eq!(q.state(), QueueState::Idle);

        let err = q.unpause().unwrap_err();
        assert_eq!(
            err,
            AppError::InvalidTransition {
                queue: "q".into(),
                from: QueueState::Idle,
                to: QueueState::Active
            }
        );
    }

    #[test]
    fn test_enqueue_rejected_unless_active_or_paused() {
        let mut q = engine(QueueMode::Fifo, RateLimit::per_second(1));
        let err = q.enqueue(vec![job("a", 0)]).unwrap_err();
        assert!(matches!(err, AppError::QueueNotAcceptingJobs { state: QueueState::Idle, .. }));

        q.start().unwrap();
        q.pause().unwrap();
        assert_ok!(q.enqueue(vec![job("a", 0)]));
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn test_duplicate_job_id_is_internal_error() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(1));
        q.enqueue(vec![job("a", 0)]).unwrap();
        let err = q.enqueue(vec![job("b", 0), job("a", 0)]).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        // Nothing from the rejected batch was admitted
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn test_fifo_dispatch_respects_batch_and_rate() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(3));
        q.update_config(&QueueConfigPatch {
            batch_size: Some(2),
            ..Default::default()
        })
        .unwrap();
        q.enqueue((0..5).map(|i| job(&format!("j{}", i), 0)).collect()).unwrap();

        let first = q.tick(0).unwrap();
        assert_eq!(ids(&first.batch), vec!["j0", "j1"]);
        assert_eq!(first.next_wake, Some(0));

        let second = q.tick(0).unwrap();
        assert_eq!(ids(&second.batch), vec!["j2"]);
        // Budget exhausted until the first tokens return
        assert_eq!(second.next_wake, Some(1_000));

        assert!(q.tick(999).unwrap().batch.is_empty());
        assert_eq!(ids(&q.tick(1_000).unwrap().batch), vec!["j3", "j4"]);
        assert_eq!(q.stats().dispatched, 5);
    }

    #[test]
    fn test_paused_queue_keeps_order() {
        let mut q = active(QueueMode::Priority, RateLimit::per_second(100));
        let mut low = job("low", 0);
        low.priority = 1;
        let mut high = job("high", 0);
        high.priority = 9;
        q.enqueue(vec![low]).unwrap();
        q.pause().unwrap();
        q.enqueue(vec![high]).unwrap();

        assert!(q.tick(0).unwrap().batch.is_empty());
        let before: Vec<String> = q.tasks(None).into_iter().map(|j| j.id).collect();

        q.unpause().unwrap();
        let after: Vec<String> = q.tasks(Some(JobStatus::Pending)).into_iter().map(|j| j.id).collect();
        assert_eq!(before, after);
        assert_eq!(ids(&q.tick(0).unwrap().batch), vec!["high"]);
    }

    #[test]
    fn test_scheduled_job_not_dispatched_early() {
        let mut q = active(QueueMode::Scheduled, RateLimit::per_second(10));
        let mut later = job("later", 0);
        later.scheduled_at = 5_000;
        q.enqueue(vec![later]).unwrap();

        let tick = q.tick(4_999).unwrap();
        assert!(tick.batch.is_empty());
        assert_eq!(tick.next_wake, Some(5_000));

        let tick = q.tick(5_000).unwrap();
        assert_eq!(ids(&tick.batch), vec!["later"]);
    }

    #[test]
    fn test_timeout_fails_once_and_retries() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(10));
        q.update_config(&QueueConfigPatch {
            worker_timeout_ms: Some(100),
            ..Default::default()
        })
        .unwrap();
        q.enqueue(vec![job("a", 0)]).unwrap();

        assert_eq!(q.tick(0).unwrap().batch.len(), 1);
        assert_eq!(q.next_wake(50), Some(100));
        assert!(q.tick(99).unwrap().timed_out.is_empty());

        let tick = q.tick(100).unwrap();
        assert_eq!(tick.timed_out, vec!["a".to_string()]);
        // Retried immediately in the same tick
        assert_eq!(ids(&tick.batch), vec!["a"]);
        assert_eq!(tick.batch[0].attempts, 1);
        assert_eq!(q.stats().timed_out, 1);

        // A late ack for the first dispatch now acks the second one
        assert_ok!(q.ack("a", 150));
        assert!(q.tick(1_000).unwrap().timed_out.is_empty());
        assert_eq!(q.stats().timed_out, 1);
    }

    #[test]
    fn test_late_delivery_failure_ignores_later_attempt() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(10));
        q.update_config(&QueueConfigPatch {
            worker_timeout_ms: Some(100),
            ..Default::default()
        })
        .unwrap();
        q.enqueue(vec![job("a", 0)]).unwrap();

        let first = q.tick(0).unwrap().batch.remove(0);
        let second = q.tick(100).unwrap().batch.remove(0);
        assert_eq!(second.attempts, 1);

        // The first delivery gives up after its dispatch already timed out
        assert!(!q.delivery_failed(&first, "worker gone", 150).unwrap());
        assert_eq!(q.find_job("a").unwrap().status, JobStatus::Dispatched);
        assert_eq!(q.stats().failed, 0);

        assert!(q.delivery_failed(&second, "worker gone", 160).unwrap());
        let job = q.find_job("a").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_dead_letter_after_max_retries() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(100));
        q.update_config(&QueueConfigPatch {
            use_dead_letter: Some(true),
            max_retries: Some(Some(2)),
            ..Default::default()
        })
        .unwrap();
        q.enqueue(vec![job("a", 0)]).unwrap();

        for now in [0, 10] {
            assert_eq!(q.tick(now).unwrap().batch.len(), 1);
            q.fail("a", "boom", now + 1).unwrap();
        }

        let job = q.find_job("a").unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert_eq!(job.attempts, 2);
        assert_eq!(q.tasks(Some(JobStatus::DeadLettered)).len(), 1);
        assert_eq!(q.snapshot().dead_lettered, 1);
        assert_eq!(q.stats().retried, 1);
    }

    #[test]
    fn test_discard_without_dead_letter() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(100));
        q.update_config(&QueueConfigPatch {
            max_retries: Some(Some(1)),
            ..Default::default()
        })
        .unwrap();
        q.enqueue(vec![job("a", 0)]).unwrap();
        q.tick(0).unwrap();
        let job = q.fail("a", "boom", 1).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.is_terminal());
        assert_eq!(q.snapshot().dead_lettered, 0);
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_cancel_pending_dispatched_and_finished() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(1));
        q.enqueue(vec![job("a", 0), job("b", 0)]).unwrap();
        q.tick(0).unwrap();

        // b is still pending
        let cancelled = q.cancel("b", 1).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // a is with a worker: advisory only, failure then ends it
        let flagged = q.cancel("a", 1).unwrap();
        assert!(flagged.cancel_requested);
        let failed = q.fail("a", "boom", 2).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.is_terminal());
        assert_eq!(q.pending_len(), 0);

        let err = q.cancel("b", 3).unwrap_err();
        assert_eq!(
            err,
            AppError::JobNotCancellable {
                id: "b".into(),
                status: JobStatus::Cancelled
            }
        );
        assert_eq!(q.cancel("zzz", 3).unwrap_err(), AppError::JobNotFound("zzz".into()));
    }

    #[test]
    fn test_outcome_for_unknown_or_settled_job() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(10));
        q.enqueue(vec![job("a", 0)]).unwrap();
        assert_eq!(q.ack("nope", 0).unwrap_err(), AppError::JobNotFound("nope".into()));
        // Pending, not in flight
        assert!(matches!(q.ack("a", 0).unwrap_err(), AppError::Domain(_)));

        q.tick(0).unwrap();
        q.ack("a", 1).unwrap();
        assert!(matches!(q.fail("a", "late", 2).unwrap_err(), AppError::Domain(_)));
    }

    #[test]
    fn test_drain_reaches_idle_only_when_empty() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(10));
        q.enqueue(vec![job("a", 0), job("b", 0)]).unwrap();
        q.pause().unwrap();
        q.drain().unwrap();
        assert_eq!(q.state(), QueueState::Draining);
        assert!(matches!(
            q.enqueue(vec![job("c", 0)]),
            Err(AppError::QueueNotAcceptingJobs { .. })
        ));

        // Draining dispatches despite the earlier pause
        let tick = q.tick(0).unwrap();
        assert_eq!(tick.batch.len(), 1);
        assert!(!tick.drained);
        q.ack("a", 1).unwrap();
        let tick = q.tick(2).unwrap();
        assert_eq!(tick.batch.len(), 1);
        assert!(!tick.drained);
        assert_eq!(q.state(), QueueState::Draining);

        q.ack("b", 3).unwrap();
        let tick = q.tick(4).unwrap();
        assert!(tick.drained);
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[test]
    fn test_drain_of_empty_queue_is_immediately_idle() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(10));
        q.drain().unwrap();
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[test]
    fn test_destroy_cancels_pending_and_abandons_in_flight() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(1));
        q.enqueue(vec![job("a", 0), job("b", 0), job("c", 0)]).unwrap();
        q.tick(0).unwrap();

        let outcome = q.destroy(5).unwrap();
        assert_eq!(outcome, DestroyOutcome { cancelled: 2, abandoned: 1 });
        assert_eq!(q.state(), QueueState::Destroyed);
        assert!(!q.needs_loop());
        assert_eq!(q.ack("a", 6).unwrap_err(), AppError::JobNotFound("a".into()));
        assert_err!(q.destroy(7));
    }

    #[test]
    fn test_update_job_only_while_pending() {
        let mut q = active(QueueMode::Priority, RateLimit::per_second(1));
        q.enqueue(vec![job("a", 0), job("b", 0)]).unwrap();
        let updated = q
            .update_job("b", &JobPatch { priority: Some(5), scheduled_at: None })
            .unwrap();
        assert_eq!(updated.priority, 5);
        assert_eq!(ids(&q.tick(0).unwrap().batch), vec!["b"]);

        let err = q
            .update_job("b", &JobPatch { priority: Some(1), scheduled_at: None })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));
    }

    #[test]
    fn test_update_config_rejects_invalid_patch() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(1));
        let err = q
            .update_config(&QueueConfigPatch {
                rate_limits: Some(vec![]),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
        assert_eq!(q.config().rate_limits.len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut q = active(QueueMode::Fifo, RateLimit::per_second(u32::MAX));
        q.update_config(&QueueConfigPatch {
            batch_size: Some(u32::MAX),
            ..Default::default()
        })
        .unwrap();
        let total = HISTORY_CAPACITY + 5;
        q.enqueue((0..total).map(|i| job(&format!("j{}", i), 0)).collect()).unwrap();
        for job in q.tick(0).unwrap().batch {
            q.ack(&job.id, 1).unwrap();
        }
        assert_eq!(q.tasks(Some(JobStatus::Acked)).len(), HISTORY_CAPACITY);
        assert!(q.find_job("j0").is_none());
        assert!(q.find_job(&format!("j{}", total - 1)).is_some());
    }
}
