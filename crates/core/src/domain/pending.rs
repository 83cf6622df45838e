//! Pending job container ordered by the queue's mode.
//!
//! Every mode maps a job to an `OrderKey (rank, seq)` and the container keeps
//! jobs in a `BTreeMap` by that key:
//! - FIFO: rank 0, so enqueue sequence alone decides
//! - Priority: rank = -priority, higher priority first, ties by sequence
//! - Scheduled: rank = scheduled_at, earliest due first, ties by sequence

use super::job::{Job, JobId};
use super::queue::QueueMode;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct OrderKey {
    rank: i64,
    seq: u64,
}

#[derive(Debug)]
pub struct PendingJobs {
    mode: QueueMode,
    jobs: BTreeMap<OrderKey, Job>,
    index: HashMap<JobId, OrderKey>,
    next_seq: u64,
}

impl PendingJobs {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            jobs: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.index.get(id).and_then(|key| self.jobs.get(key))
    }

    /// Admit a job behind everything of equal rank
    pub fn push(&mut self, mut job: Job) {
        job.seq = self.next_seq;
        self.next_seq += 1;
        let key = self.key_for(&job);
        self.index.insert(job.id.clone(), key);
        self.jobs.insert(key, job);
    }

    pub fn remove(&mut self, id: &str) -> Option<Job> {
        let key = self.index.remove(id)?;
        self.jobs.remove(&key)
    }

    /// Remove up to `max` jobs eligible at `now`, in dispatch order
    pub fn take_ready(&mut self, now: i64, max: usize) -> Vec<Job> {
        let keys: Vec<OrderKey> = self
            .jobs
            .iter()
            .take_while(|(_, job)| self.is_due(job, now))
            .take(max)
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let job = self.jobs.remove(&key)?;
                self.index.remove(&job.id);
                Some(job)
            })
            .collect()
    }

    /// Number of jobs eligible at `now`
    pub fn ready_count(&self, now: i64) -> usize {
        self.jobs
            .values()
            .take_while(|job| self.is_due(job, now))
            .count()
    }

    /// Earliest future instant at which a not-yet-due job becomes eligible
    pub fn next_due_at(&self, now: i64) -> Option<i64> {
        if self.mode != QueueMode::Scheduled {
            return None;
        }
        self.jobs
            .values()
            .map(|job| job.scheduled_at)
            .find(|at| *at > now)
    }

    /// Change ordering fields of a pending job, keeping its original sequence
    pub fn reorder(&mut self, id: &str, priority: Option<i32>, scheduled_at: Option<i64>) -> bool {
        let Some(key) = self.index.get(id).copied() else {
            return false;
        };
        let Some(mut job) = self.jobs.remove(&key) else {
            return false;
        };
        if let Some(priority) = priority {
            job.priority = priority;
        }
        if let Some(at) = scheduled_at {
            job.scheduled_at = at;
        }
        let new_key = self.key_for(&job);
        self.index.insert(job.id.clone(), new_key);
        self.jobs.insert(new_key, job);
        true
    }

    /// Jobs in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Empty the container, returning jobs in dispatch order
    pub fn drain_all(&mut self) -> Vec<Job> {
        self.index.clear();
        std::mem::take(&mut self.jobs).into_values().collect()
    }

    fn key_for(&self, job: &Job) -> OrderKey {
        let rank = match self.mode {
            QueueMode::Fifo => 0,
            QueueMode::Priority => -(job.priority as i64),
            QueueMode::Scheduled => job.scheduled_at,
        };
        OrderKey { rank, seq: job.seq }
    }

    fn is_due(&self, job: &Job, now: i64) -> bool {
        self.mode != QueueMode::Scheduled || job.scheduled_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobPayload;

    fn job(id: &str) -> Job {
        Job::new(id, 0, "q", JobPayload::new(serde_json::json!({})))
    }

    fn with_priority(id: &str, priority: i32) -> Job {
        let mut job = job(id);
        job.priority = priority;
        job
    }

    fn due_at(id: &str, at: i64) -> Job {
        let mut job = job(id);
        job.scheduled_at = at;
        job
    }

    fn ids(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.id.as_str()).collect()
    }

    #[test]
    fn test_fifo_keeps_enqueue_order() {
        let mut pending = PendingJobs::new(QueueMode::Fifo);
        for id in ["a", "b", "c", "d", "e"] {
            pending.push(job(id));
        }
        assert_eq!(ids(&pending.take_ready(0, 2)), vec!["a", "b"]);
        assert_eq!(ids(&pending.take_ready(0, 10)), vec!["c", "d", "e"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fifo_ignores_priority_and_schedule() {
        let mut pending = PendingJobs::new(QueueMode::Fifo);
        pending.push(due_at("later", 10_000));
        pending.push(with_priority("urgent", 99));
        assert_eq!(ids(&pending.take_ready(0, 10)), vec!["later", "urgent"]);
    }

    #[test]
    fn test_priority_desc_with_stable_ties() {
        let mut pending = PendingJobs::new(QueueMode::Priority);
        pending.push(with_priority("low-1", 1));
        pending.push(with_priority("mid-1", 5));
        pending.push(with_priority("high", 10));
        pending.push(with_priority("mid-2", 5));
        pending.push(with_priority("neg", -3));
        pending.push(with_priority("low-2", 1));

        let order = pending.take_ready(0, 10);
        assert_eq!(
            ids(&order),
            vec!["high", "mid-1", "mid-2", "low-1", "low-2", "neg"]
        );
    }

    #[test]
    fn test_scheduled_only_due_jobs_in_due_order() {
        let mut pending = PendingJobs::new(QueueMode::Scheduled);
        pending.push(due_at("t300", 300));
        pending.push(due_at("t100-a", 100));
        pending.push(due_at("t200", 200));
        pending.push(due_at("t100-b", 100));

        assert!(pending.take_ready(99, 10).is_empty());
        assert_eq!(pending.ready_count(150), 2);
        assert_eq!(pending.next_due_at(150), Some(200));
        assert_eq!(ids(&pending.take_ready(150, 10)), vec!["t100-a", "t100-b"]);
        assert_eq!(ids(&pending.take_ready(1_000, 10)), vec!["t200", "t300"]);
        assert_eq!(pending.next_due_at(1_000), None);
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut pending = PendingJobs::new(QueueMode::Fifo);
        pending.push(job("a"));
        pending.push(job("b"));
        assert!(pending.contains("a"));
        assert_eq!(pending.remove("a").unwrap().id, "a");
        assert!(pending.remove("a").is_none());
        assert_eq!(pending.get("b").unwrap().id, "b");
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_reorder_priority() {
        let mut pending = PendingJobs::new(QueueMode::Priority);
        pending.push(with_priority("a", 1));
        pending.push(with_priority("b", 1));
        assert!(pending.reorder("b", Some(7), None));
        assert!(!pending.reorder("missing", Some(7), None));
        assert_eq!(ids(&pending.take_ready(0, 10)), vec!["b", "a"]);
    }

    #[test]
    fn test_drain_all_returns_dispatch_order() {
        let mut pending = PendingJobs::new(QueueMode::Priority);
        pending.push(with_priority("a", 1));
        pending.push(with_priority("b", 2));
        assert_eq!(ids(&pending.drain_all()), vec!["b", "a"]);
        assert!(!pending.contains("a"));
    }
}
