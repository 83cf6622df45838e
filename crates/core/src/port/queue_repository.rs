// Queue Repository Port (Interface)

use crate::domain::QueueRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Persistence of queue configuration and lifecycle state.
///
/// Jobs are not persisted; only what is needed to recreate queues on restart.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert or replace the record keyed by `record.config.name`
    async fn upsert(&self, record: &QueueRecord) -> Result<()>;

    /// Remove a record. Missing names are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// All stored records ordered by name
    async fn list(&self) -> Result<Vec<QueueRecord>>;
}

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    /// In-memory repository for tests
    #[derive(Default)]
    pub struct InMemoryQueueRepository {
        records: Mutex<BTreeMap<String, QueueRecord>>,
    }

    impl InMemoryQueueRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn get(&self, name: &str) -> Option<QueueRecord> {
            self.records.lock().await.get(name).cloned()
        }
    }

    #[async_trait]
    impl QueueRepository for InMemoryQueueRepository {
        async fn upsert(&self, record: &QueueRecord) -> Result<()> {
            self.records
                .lock()
                .await
                .insert(record.config.name.clone(), record.clone());
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.records.lock().await.remove(name);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<QueueRecord>> {
            Ok(self.records.lock().await.values().cloned().collect())
        }
    }
}
