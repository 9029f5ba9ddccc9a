//! Snapshot Manager
//!
//! Invoked after every successful append. A snapshot is always recomputed from
//! genesis up to its target sequence number, never derived from an older
//! snapshot, and replaces whatever row the aggregate had.

use std::sync::Arc;

use chrono::Utc;

use crate::aggregate::Aggregate;
use crate::event_store::{Event, EventStore};
use crate::replay::fold;

use super::{Snapshot, SnapshotError, SnapshotPolicy, SnapshotStore};

#[derive(Clone)]
pub struct SnapshotManager {
    events: Arc<dyn EventStore>,
    store: Arc<dyn SnapshotStore>,
    policy: Arc<dyn SnapshotPolicy>,
}

impl SnapshotManager {
    pub fn new(
        events: Arc<dyn EventStore>,
        store: Arc<dyn SnapshotStore>,
        policy: Arc<dyn SnapshotPolicy>,
    ) -> Self {
        Self {
            events,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &dyn SnapshotPolicy {
        self.policy.as_ref()
    }

    /// Snapshot the aggregate if the policy says `sequence_number` is due
    pub async fn maybe_snapshot<A: Aggregate>(
        &self,
        aggregate_id: &str,
        sequence_number: i64,
    ) -> Result<Option<Snapshot>, SnapshotError> {
        if !self.policy.should_snapshot(sequence_number) {
            return Ok(None);
        }

        self.snapshot_at::<A>(aggregate_id, sequence_number)
            .await
            .map(Some)
    }

    /// Fold events `1..=sequence_number` from genesis and store the result
    pub async fn snapshot_at<A: Aggregate>(
        &self,
        aggregate_id: &str,
        sequence_number: i64,
    ) -> Result<Snapshot, SnapshotError> {
        let events: Vec<Event> = self
            .events
            .load(aggregate_id, 0)
            .await?
            .into_iter()
            .take_while(|event| event.sequence_number <= sequence_number)
            .collect();

        let available = events.last().map(|e| e.sequence_number).unwrap_or(0);
        if available != sequence_number {
            return Err(SnapshotError::Incomplete {
                aggregate_id: aggregate_id.to_string(),
                requested: sequence_number,
                available,
            });
        }

        let state = fold(A::empty(aggregate_id), &events).map_err(|source| SnapshotError::Fold {
            aggregate_id: aggregate_id.to_string(),
            source,
        })?;

        let snapshot = Snapshot {
            aggregate_id: aggregate_id.to_string(),
            state: serde_json::to_value(&state)?,
            last_sequence_number: state.version(),
            taken_at: Utc::now(),
        };

        self.store.put(snapshot.clone()).await?;

        tracing::info!(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %aggregate_id,
            last_sequence_number = snapshot.last_sequence_number,
            "Snapshot saved"
        );

        Ok(snapshot)
    }

    /// Write the latest due snapshot if an earlier attempt was missed.
    /// Returns whether a snapshot was written.
    pub async fn reconcile<A: Aggregate>(
        &self,
        aggregate_id: &str,
        head: i64,
    ) -> Result<bool, SnapshotError> {
        let Some(due) = self.policy.latest_due(head) else {
            return Ok(false);
        };

        let current = self
            .store
            .get(aggregate_id)
            .await?
            .map(|snapshot| snapshot.last_sequence_number)
            .unwrap_or(0);

        if current >= due {
            return Ok(false);
        }

        self.snapshot_at::<A>(aggregate_id, due).await?;
        Ok(true)
    }

    pub async fn latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        self.store.get(aggregate_id).await
    }
}
