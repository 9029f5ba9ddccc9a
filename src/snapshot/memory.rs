//! In-memory snapshot store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, aggregate_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.snapshots.read().await.get(aggregate_id).cloned())
    }

    async fn put(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if existing.last_sequence_number > snapshot.last_sequence_number => {}
            _ => {
                snapshots.insert(snapshot.aggregate_id.clone(), snapshot);
            }
        }
        Ok(())
    }

    async fn delete(&self, aggregate_id: &str) -> Result<(), SnapshotError> {
        self.snapshots.write().await.remove(aggregate_id);
        Ok(())
    }
}
