// Worker Sink Port - where dispatched jobs are handed to workers

use crate::domain::Job;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery failure. Counts as a failed attempt of that dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    #[error("worker rejected job with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("worker sink closed")]
    Closed,
}

/// Receives dispatched jobs.
///
/// Delivery is the first half of a two-phase protocol: the worker reports
/// ack/fail later through the manager, or the job times out.
#[async_trait]
pub trait WorkerSink: Send + Sync {
    async fn deliver(&self, job: &Job) -> Result<(), SinkError>;
}

/// In-process sink forwarding jobs over an mpsc channel
pub struct ChannelWorkerSink {
    tx: mpsc::UnboundedSender<Job>,
}

impl ChannelWorkerSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl WorkerSink for ChannelWorkerSink {
    async fn deliver(&self, job: &Job) -> Result<(), SinkError> {
        self.tx.send(job.clone()).map_err(|_| SinkError::Closed)
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every delivered job; optionally refuses delivery
    #[derive(Default)]
    pub struct RecordingSink {
        delivered: Mutex<Vec<Job>>,
        refuse: Mutex<Option<SinkError>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn refusing(err: SinkError) -> Self {
            let sink = Self::default();
            sink.set_refusal(Some(err));
            sink
        }

        pub fn set_refusal(&self, err: Option<SinkError>) {
            *self.refuse.lock().unwrap_or_else(|e| e.into_inner()) = err;
        }

        /// Snapshot of delivered jobs in delivery order
        pub fn delivered(&self) -> Vec<Job> {
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        pub fn delivered_ids(&self) -> Vec<String> {
            self.delivered().into_iter().map(|j| j.id).collect()
        }

        pub fn delivery_count(&self) -> usize {
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len()
        }
    }

    #[async_trait]
    impl WorkerSink for RecordingSink {
        async fn deliver(&self, job: &Job) -> Result<(), SinkError> {
            if let Some(err) = self
                .refuse
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
            {
                return Err(err);
            }
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(job.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPayload;

    #[tokio::test]
    async fn test_channel_sink_forwards_jobs() {
        let (sink, mut rx) = ChannelWorkerSink::new();
        let job = Job::new("j1", 0, "q", JobPayload::new(serde_json::json!(1)));
        sink.deliver(&job).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, "j1");

        drop(rx);
        assert_eq!(sink.deliver(&job).await, Err(SinkError::Closed));
    }
}
