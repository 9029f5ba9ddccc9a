//! Snapshot module
//!
//! Snapshots cache a replay result so later replays only fold the tail of a
//! stream. They are never a source of truth: deleting every snapshot must not
//! change any query result.

mod manager;
mod memory;
mod policy;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::FoldError;
use crate::event_store::EventStoreError;

pub use manager::SnapshotManager;
pub use memory::InMemorySnapshotStore;
pub use policy::{EveryNEvents, SnapshotPolicy, DEFAULT_SNAPSHOT_INTERVAL};
pub use repository::PgSnapshotStore;

/// Stored replay result of one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub state: Value,
    pub last_sequence_number: i64,
    pub taken_at: DateTime<Utc>,
}

/// Snapshot storage: at most one row per aggregate
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, aggregate_id: &str) -> Result<Option<Snapshot>, SnapshotError>;

    /// Insert or replace the aggregate's snapshot. A snapshot older than the
    /// stored one is ignored.
    async fn put(&self, snapshot: Snapshot) -> Result<(), SnapshotError>;

    async fn delete(&self, aggregate_id: &str) -> Result<(), SnapshotError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invariant violation in {aggregate_id}: {source}")]
    Fold {
        aggregate_id: String,
        #[source]
        source: FoldError,
    },

    #[error("Cannot snapshot {aggregate_id} at {requested}: stream ends at {available}")]
    Incomplete {
        aggregate_id: String,
        requested: i64,
        available: i64,
    },
}
