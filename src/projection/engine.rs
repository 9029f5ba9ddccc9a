//! Projection Engine
//!
//! Applies events to the read models. Apply is idempotent and heals gaps by
//! pulling the missing events from the log, so it is safe to call for every
//! appended event, to re-run after failures and to race with a rebuild.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::event_store::{Event, EventStore};

use super::rebuild::{RebuildControl, RebuildPhase};
use super::{
    AccountSummary, ApplyOutcome, ProjectionChange, ProjectionError, ProjectionLag,
    ProjectionStatus, ProjectionStore, TransactionHistoryEntry,
};

/// Result of a completed rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub events_replayed: u64,
    pub accounts_rebuilt: usize,
    pub elapsed_ms: u64,
    /// Streams whose replay halted; their later events were skipped
    pub failed_streams: Vec<FailedStream>,
}

/// A stream the rebuild could not project past one of its events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedStream {
    pub aggregate_id: String,
    pub sequence_number: i64,
    pub reason: String,
}

#[derive(Clone)]
pub struct ProjectionEngine {
    events: Arc<dyn EventStore>,
    store: Arc<dyn ProjectionStore>,
    rebuilding: Arc<Mutex<()>>,
}

impl ProjectionEngine {
    pub fn new(events: Arc<dyn EventStore>, store: Arc<dyn ProjectionStore>) -> Self {
        Self {
            events,
            store,
            rebuilding: Arc::new(Mutex::new(())),
        }
    }

    /// Apply one event. A gap in front of the event is filled from the log.
    pub async fn apply(&self, event: &Event) -> Result<ApplyOutcome, ProjectionError> {
        let change = ProjectionChange::from_event(event)?;

        match self.store.apply_change(&change).await? {
            ApplyOutcome::Gap { current_version } => {
                tracing::warn!(
                    aggregate_id = %event.aggregate_id,
                    sequence_number = event.sequence_number,
                    current_version,
                    "Projection behind the log, catching up"
                );
                self.catch_up(&event.aggregate_id).await?;
                Ok(ApplyOutcome::Applied)
            }
            outcome => Ok(outcome),
        }
    }

    /// Apply every event of one stream that the summary does not cover yet.
    /// Returns the number of events applied.
    pub async fn catch_up(&self, aggregate_id: &str) -> Result<u64, ProjectionError> {
        let from = self
            .store
            .summary(aggregate_id)
            .await?
            .map(|summary| summary.version)
            .unwrap_or(0);

        let mut applied = 0;
        for event in self.events.load(aggregate_id, from).await? {
            let change = ProjectionChange::from_event(&event)?;
            match self.store.apply_change(&change).await? {
                ApplyOutcome::Applied => applied += 1,
                ApplyOutcome::AlreadyApplied => {}
                ApplyOutcome::Gap { current_version } => {
                    return Err(ProjectionError::Gap {
                        aggregate_id: aggregate_id.to_string(),
                        expected: current_version + 1,
                        found: event.sequence_number,
                    });
                }
            }
        }

        if applied > 0 {
            tracing::info!(aggregate_id = %aggregate_id, applied, "Projection caught up");
        }

        Ok(applied)
    }

    /// Drop both projections and replay the whole log into them
    pub async fn rebuild(&self) -> Result<RebuildReport, ProjectionError> {
        self.rebuild_with(&RebuildControl::default()).await
    }

    pub(super) async fn rebuild_with(
        &self,
        control: &RebuildControl,
    ) -> Result<RebuildReport, ProjectionError> {
        let _guard = self.rebuilding.lock().await;
        let started = Instant::now();

        tracing::info!("Projection rebuild started");

        control.set_phase(RebuildPhase::Clearing).await;
        self.store.reset().await?;

        control.set_phase(RebuildPhase::Loading).await;
        let events = self.events.load_all().await?;
        control.set_total(events.len() as u64).await;

        control.set_phase(RebuildPhase::Replaying).await;
        let mut accounts = HashSet::new();
        let mut halted = HashSet::new();
        let mut failed_streams = Vec::new();
        let mut replayed = 0u64;
        for event in &events {
            if control.is_cancelled() {
                tracing::warn!(replayed, "Projection rebuild cancelled");
                return Err(ProjectionError::Cancelled);
            }

            let aggregate_id = event.aggregate_id.as_str();
            if !halted.contains(aggregate_id) {
                match self.apply(event).await {
                    Ok(_) => {
                        accounts.insert(aggregate_id);
                        replayed += 1;
                    }
                    Err(e) if e.is_stream_fault() => {
                        tracing::error!(
                            aggregate_id = %aggregate_id,
                            sequence_number = event.sequence_number,
                            error = %e,
                            "Stream halted during projection rebuild"
                        );
                        halted.insert(aggregate_id);
                        failed_streams.push(FailedStream {
                            aggregate_id: aggregate_id.to_string(),
                            sequence_number: event.sequence_number,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            control.advance().await;
        }

        let report = RebuildReport {
            events_replayed: replayed,
            accounts_rebuilt: accounts.difference(&halted).count(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            failed_streams,
        };

        tracing::info!(
            events_replayed = report.events_replayed,
            accounts_rebuilt = report.accounts_rebuilt,
            failed_streams = report.failed_streams.len(),
            elapsed_ms = report.elapsed_ms,
            "Projection rebuild complete"
        );

        Ok(report)
    }

    /// Events processed and lag for every projection
    pub async fn status(&self) -> Result<ProjectionStatus, ProjectionError> {
        let total_events = self.events.count().await?;
        let projections = self
            .store
            .cursors()
            .await?
            .into_iter()
            .map(|cursor| ProjectionLag {
                lag: (total_events - cursor.events_processed).max(0),
                name: cursor.name,
                last_processed: cursor.events_processed,
            })
            .collect();

        Ok(ProjectionStatus {
            total_events,
            projections,
        })
    }

    pub async fn summary(&self, account_id: &str) -> Result<Option<AccountSummary>, ProjectionError> {
        self.store.summary(account_id).await
    }

    pub async fn summaries(&self) -> Result<Vec<AccountSummary>, ProjectionError> {
        self.store.summaries().await
    }

    pub async fn transactions(
        &self,
        account_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionHistoryEntry>, ProjectionError> {
        self.store.transactions(account_id, limit, offset).await
    }

    pub async fn transaction_count(&self, account_id: &str) -> Result<i64, ProjectionError> {
        self.store.transaction_count(account_id).await
    }
}
