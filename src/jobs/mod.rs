//! Scheduled Jobs
//!
//! Background maintenance that repairs side effects a command could not
//! finish: projections left behind the log and snapshots that were due but
//! never written.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::interval;

use crate::aggregate::BankAccount;
use crate::event_store::{EventStore, EventStoreError, StreamHead};
use crate::ledger::Ledger;
use crate::projection::ProjectionError;
use crate::snapshot::SnapshotError;

/// Outcome of one repair job over every stream. A failing stream is
/// recorded and skipped; the remaining streams are still repaired.
#[derive(Debug, Default)]
pub struct RepairPass {
    pub repaired: u64,
    pub errors: Vec<JobError>,
}

// =========================================================================
// Projection catch-up
// =========================================================================

/// Apply missing events to every summary that is behind its stream.
/// `repaired` counts the events applied.
pub async fn catch_up_projections(ledger: &Ledger, heads: &[StreamHead]) -> RepairPass {
    let engine = ledger.projection_engine();
    let mut pass = RepairPass::default();

    for head in heads {
        let result: Result<u64, ProjectionError> = async {
            let version = engine
                .summary(&head.aggregate_id)
                .await?
                .map(|summary| summary.version)
                .unwrap_or(0);

            if version < head.sequence_number {
                engine.catch_up(&head.aggregate_id).await
            } else {
                Ok(0)
            }
        }
        .await;

        match result {
            Ok(applied) => pass.repaired += applied,
            Err(source) => {
                tracing::error!(
                    aggregate_id = %head.aggregate_id,
                    error = %source,
                    "Projection catch-up failed"
                );
                pass.errors.push(JobError::Projection {
                    aggregate_id: head.aggregate_id.clone(),
                    source,
                });
            }
        }
    }

    if pass.repaired > 0 {
        tracing::warn!(events_applied = pass.repaired, "Repaired lagging projections");
    }

    pass
}

// =========================================================================
// Snapshot reconciliation
// =========================================================================

/// Write the latest due snapshot of every stream that is missing one.
/// `repaired` counts the snapshots written.
pub async fn reconcile_snapshots(ledger: &Ledger, heads: &[StreamHead]) -> RepairPass {
    let snapshots = ledger.snapshot_manager();
    let mut pass = RepairPass::default();

    for head in heads {
        match snapshots
            .reconcile::<BankAccount>(&head.aggregate_id, head.sequence_number)
            .await
        {
            Ok(true) => pass.repaired += 1,
            Ok(false) => {}
            Err(source) => {
                tracing::error!(
                    aggregate_id = %head.aggregate_id,
                    error = %source,
                    "Snapshot reconcile failed"
                );
                pass.errors.push(JobError::Snapshot {
                    aggregate_id: head.aggregate_id.clone(),
                    source,
                });
            }
        }
    }

    if pass.repaired > 0 {
        tracing::info!(snapshots_written = pass.repaired, "Reconciled missing snapshots");
    }

    pass
}

// =========================================================================
// Maintenance Scheduler
// =========================================================================

/// Maintenance scheduler - runs the repair jobs on an interval
pub struct MaintenanceScheduler {
    ledger: Ledger,
    every: Duration,
}

impl MaintenanceScheduler {
    pub fn new(ledger: Ledger, every: Duration) -> Self {
        Self { ledger, every }
    }

    /// Start the scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(interval_secs = self.every.as_secs(), "Maintenance scheduler started");

        let mut ticker = interval(self.every);
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            for error in &report.errors {
                tracing::error!(error = %error, "Maintenance job failed");
            }
        }
    }

    /// Run every job once (for manual trigger or testing)
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let heads = match self.ledger.event_store().stream_heads().await {
            Ok(heads) => heads,
            Err(e) => {
                report.errors.push(JobError::from(e).to_string());
                report.completed_at = Utc::now();
                return report;
            }
        };
        report.streams_checked = heads.len();

        let projections = catch_up_projections(&self.ledger, &heads).await;
        report.projection_events_applied = projections.repaired;
        report
            .errors
            .extend(projections.errors.iter().map(ToString::to_string));

        let snapshots = reconcile_snapshots(&self.ledger, &heads).await;
        report.snapshots_written = snapshots.repaired;
        report
            .errors
            .extend(snapshots.errors.iter().map(ToString::to_string));

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub streams_checked: usize,
    pub projection_events_applied: u64,
    pub snapshots_written: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Stream heads: {0}")]
    Store(#[from] EventStoreError),

    #[error("Projection catch-up for {aggregate_id}: {source}")]
    Projection {
        aggregate_id: String,
        #[source]
        source: ProjectionError,
    },

    #[error("Snapshot reconcile for {aggregate_id}: {source}")]
    Snapshot {
        aggregate_id: String,
        #[source]
        source: SnapshotError,
    },
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::domain::{AccountEvent, AccountOpened, MoneyMoved};
    use crate::event_store::NewEvent;
    use rust_decimal_macros::dec;

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.projection_events_applied, 0);
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_run_once_repairs_healthy_streams_past_a_malformed_one() {
        let ledger = Ledger::in_memory(LedgerConfig {
            snapshot_interval: 1,
            ..LedgerConfig::default()
        });
        let events = ledger.event_store();

        events
            .append(
                NewEvent {
                    aggregate_id: "aaa".to_string(),
                    aggregate_type: "BankAccount".to_string(),
                    event_type: "Frozen".to_string(),
                    payload: serde_json::json!({}),
                    schema_version: 1,
                    transaction_id: None,
                },
                1,
            )
            .await
            .unwrap();

        let opened = AccountEvent::AccountCreated(AccountOpened {
            owner_name: "Bob".to_string(),
            currency: "USD".to_string(),
            initial_balance: dec!(5),
        });
        events
            .append(NewEvent::account("bbb", &opened).unwrap(), 1)
            .await
            .unwrap();

        let scheduler = MaintenanceScheduler::new(ledger.clone(), Duration::from_secs(60));
        let report = scheduler.run_once().await;

        assert_eq!(report.streams_checked, 2);
        assert_eq!(report.projection_events_applied, 1);
        assert_eq!(report.snapshots_written, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.contains("aaa")));

        let summary = ledger.projection_engine().summary("bbb").await.unwrap().unwrap();
        assert_eq!(summary.balance, dec!(5));
        assert!(ledger.snapshot_manager().latest("bbb").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_once_repairs_projection_and_snapshot() {
        let ledger = Ledger::in_memory(LedgerConfig {
            snapshot_interval: 3,
            ..LedgerConfig::default()
        });
        let events = ledger.event_store();

        // Appended behind the ledger's back: nothing projected, nothing snapshotted
        let opened = AccountEvent::AccountCreated(AccountOpened {
            owner_name: "Alice".to_string(),
            currency: "USD".to_string(),
            initial_balance: dec!(10),
        });
        events
            .append(NewEvent::account("acc1", &opened).unwrap(), 1)
            .await
            .unwrap();
        for seq in 2..=4 {
            let deposit = AccountEvent::MoneyDeposited(MoneyMoved {
                amount: dec!(1),
                transaction_id: format!("t{}", seq),
                description: None,
            });
            events
                .append(NewEvent::account("acc1", &deposit).unwrap(), seq)
                .await
                .unwrap();
        }

        let scheduler = MaintenanceScheduler::new(ledger.clone(), Duration::from_secs(60));
        let report = scheduler.run_once().await;

        assert!(report.errors.is_empty());
        assert_eq!(report.streams_checked, 1);
        assert_eq!(report.projection_events_applied, 4);
        assert_eq!(report.snapshots_written, 1);

        let summary = ledger.projection_engine().summary("acc1").await.unwrap().unwrap();
        assert_eq!(summary.balance, dec!(13));

        let snapshot = ledger.snapshot_manager().latest("acc1").await.unwrap().unwrap();
        assert_eq!(snapshot.last_sequence_number, 3);

        // Nothing left to repair
        let report = scheduler.run_once().await;
        assert_eq!(report.projection_events_applied, 0);
        assert_eq!(report.snapshots_written, 0);
    }
}
