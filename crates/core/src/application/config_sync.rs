// Config Sync Service
// Periodically writes every queue's record to the repository

use crate::application::manager::QueueManager;
use crate::application::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::QueueRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Config sync scheduler
///
/// Covers write-through failures and state changes made by dispatch loops
/// (e.g. a drain settling to Idle). Should be spawned in tokio::spawn.
pub struct ConfigSyncScheduler {
    manager: Arc<QueueManager>,
    repository: Arc<dyn QueueRepository>,
    every: Duration,
}

impl ConfigSyncScheduler {
    /// Create a new config sync scheduler
    ///
    /// # Arguments
    /// * `manager` - Source of the current queue records
    /// * `repository` - Destination store
    /// * `every` - How often to sync
    pub fn new(
        manager: Arc<QueueManager>,
        repository: Arc<dyn QueueRepository>,
        every: Duration,
    ) -> Self {
        Self {
            manager,
            repository,
            every,
        }
    }

    /// Run sync loop until shutdown, then sync one last time
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(interval_secs = self.every.as_secs(), "Config sync scheduler started");

        let mut tick = interval(self.every);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sync_now().await {
                        error!(error = %e, "Scheduled config sync failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        if let Err(e) = self.sync_now().await {
            error!(error = %e, "Final config sync failed");
        }
        info!("Config sync scheduler stopped");
    }

    /// Upsert every live queue's record and drop records of queues that no longer exist
    pub async fn sync_now(&self) -> Result<usize> {
        let written = self.manager.sync_records(self.repository.as_ref()).await?;
        info!(queues = written, "Config sync completed");
        Ok(written)
    }
}
