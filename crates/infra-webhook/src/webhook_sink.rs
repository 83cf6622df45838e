// Webhook worker sink
// Delivers each dispatched job as a JSON POST; the worker reports the
// outcome later through the task ack/fail endpoints.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use taskmill_core::domain::Job;
use taskmill_core::port::{SinkError, WorkerSink};

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Request body sent to the worker endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBody {
    pub job: Job,
    /// Epoch ms by which the worker must ack or fail
    pub deadline: Option<i64>,
}

/// POSTs dispatched jobs to a fixed worker URL
pub struct WebhookWorkerSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookWorkerSink {
    /// Create a new webhook sink
    ///
    /// # Arguments
    /// * `url` - Worker endpoint receiving `DeliveryBody` JSON
    /// * `delivery_timeout` - Upper bound for one POST (connect + response)
    ///
    /// # Example
    /// ```ignore
    /// let sink = WebhookWorkerSink::new("http://127.0.0.1:9600/jobs", Duration::from_secs(5))?;
    /// ```
    pub fn new(url: impl Into<String>, delivery_timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(delivery_timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(format!("http client setup failed: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WorkerSink for WebhookWorkerSink {
    async fn deliver(&self, job: &Job) -> Result<(), SinkError> {
        let body = DeliveryBody {
            job: job.clone(),
            deadline: job.deadline,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(job_id = %job.id, url = %self.url, error = %e, "Worker endpoint unreachable");
                SinkError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(job_id = %job.id, status = status.as_u16(), "Job delivered");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }
}
