//! In-memory projection store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::aggregate::AccountStatus;

use super::{
    AccountSummary, ApplyOutcome, ChangeKind, ProjectionChange, ProjectionCursor,
    ProjectionError, ProjectionStore, TransactionHistoryEntry, PROJECTIONS,
};

#[derive(Debug, Default)]
struct ReadModels {
    summaries: HashMap<String, AccountSummary>,
    history: HashMap<String, TransactionHistoryEntry>,
    processed: HashMap<&'static str, i64>,
}

impl ReadModels {
    fn bump_cursors(&mut self) {
        for name in PROJECTIONS {
            *self.processed.entry(name).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    models: Mutex<ReadModels>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a summary row directly, bypassing the event log.
    /// Rebuild restores whatever the log implies.
    pub async fn replace_summary(&self, summary: AccountSummary) {
        self.models
            .lock()
            .await
            .summaries
            .insert(summary.account_id.clone(), summary);
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn apply_change(&self, change: &ProjectionChange) -> Result<ApplyOutcome, ProjectionError> {
        let mut models = self.models.lock().await;

        let current = models
            .summaries
            .get(&change.aggregate_id)
            .map(|summary| summary.version)
            .unwrap_or(0);

        if change.sequence_number <= current {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        if change.sequence_number != current + 1 {
            return Ok(ApplyOutcome::Gap {
                current_version: current,
            });
        }

        match &change.kind {
            ChangeKind::Opened {
                owner_name,
                currency,
                initial_balance,
            } => {
                models.summaries.insert(
                    change.aggregate_id.clone(),
                    AccountSummary {
                        account_id: change.aggregate_id.clone(),
                        owner_name: owner_name.clone(),
                        currency: currency.clone(),
                        balance: *initial_balance,
                        status: AccountStatus::Open,
                        version: change.sequence_number,
                    },
                );
            }
            ChangeKind::Moved {
                kind,
                transaction_id,
                amount,
                description,
            } => {
                let delta = change.balance_delta();
                let summary = models
                    .summaries
                    .get_mut(&change.aggregate_id)
                    .ok_or_else(|| ProjectionError::MissingSummary(change.aggregate_id.clone()))?;
                summary.balance += delta;
                summary.version = change.sequence_number;

                models
                    .history
                    .entry(transaction_id.clone())
                    .or_insert_with(|| TransactionHistoryEntry {
                        transaction_id: transaction_id.clone(),
                        account_id: change.aggregate_id.clone(),
                        kind: *kind,
                        amount: *amount,
                        description: description.clone(),
                        sequence_number: change.sequence_number,
                        timestamp: change.timestamp,
                    });
            }
            ChangeKind::Closed => {
                let summary = models
                    .summaries
                    .get_mut(&change.aggregate_id)
                    .ok_or_else(|| ProjectionError::MissingSummary(change.aggregate_id.clone()))?;
                summary.status = AccountStatus::Closed;
                summary.version = change.sequence_number;
            }
        }

        models.bump_cursors();
        Ok(ApplyOutcome::Applied)
    }

    async fn summary(&self, account_id: &str) -> Result<Option<AccountSummary>, ProjectionError> {
        Ok(self.models.lock().await.summaries.get(account_id).cloned())
    }

    async fn summaries(&self) -> Result<Vec<AccountSummary>, ProjectionError> {
        let models = self.models.lock().await;
        let mut summaries: Vec<AccountSummary> = models.summaries.values().cloned().collect();
        summaries.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(summaries)
    }

    async fn transactions(
        &self,
        account_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionHistoryEntry>, ProjectionError> {
        let models = self.models.lock().await;
        let mut entries: Vec<TransactionHistoryEntry> = models
            .history
            .values()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.sequence_number.cmp(&a.sequence_number))
        });

        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transaction_count(&self, account_id: &str) -> Result<i64, ProjectionError> {
        let models = self.models.lock().await;
        Ok(models
            .history
            .values()
            .filter(|entry| entry.account_id == account_id)
            .count() as i64)
    }

    async fn cursors(&self) -> Result<Vec<ProjectionCursor>, ProjectionError> {
        let models = self.models.lock().await;
        Ok(PROJECTIONS
            .iter()
            .map(|name| ProjectionCursor {
                name: name.to_string(),
                events_processed: models.processed.get(name).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        let mut models = self.models.lock().await;
        models.summaries.clear();
        models.history.clear();
        models.processed.clear();
        Ok(())
    }
}
