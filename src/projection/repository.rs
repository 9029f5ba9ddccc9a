//! PostgreSQL projection store
//!
//! Every change runs in one transaction that locks the summary row, checks
//! its version, updates the read models and bumps both cursors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::aggregate::AccountStatus;

use super::{
    AccountSummary, ApplyOutcome, ChangeKind, EntryKind, ProjectionChange, ProjectionCursor,
    ProjectionError, ProjectionStore, TransactionHistoryEntry, PROJECTIONS,
};

type SummaryRow = (String, String, String, Decimal, String, i64);

type HistoryRow = (
    String,
    String,
    String,
    Decimal,
    Option<String>,
    i64,
    DateTime<Utc>,
);

fn summary_from_row(
    (account_id, owner_name, currency, balance, status, version): SummaryRow,
) -> Result<AccountSummary, ProjectionError> {
    let status: AccountStatus = status
        .parse()
        .map_err(|e| ProjectionError::Corrupt(format!("account {}: {}", account_id, e)))?;

    Ok(AccountSummary {
        account_id,
        owner_name,
        currency,
        balance,
        status,
        version,
    })
}

fn history_from_row(
    (transaction_id, account_id, kind, amount, description, sequence_number, timestamp): HistoryRow,
) -> Result<TransactionHistoryEntry, ProjectionError> {
    let kind: EntryKind = kind
        .parse()
        .map_err(|e| ProjectionError::Corrupt(format!("transaction {}: {}", transaction_id, e)))?;

    Ok(TransactionHistoryEntry {
        transaction_id,
        account_id,
        kind,
        amount,
        description,
        sequence_number,
        timestamp,
    })
}

#[derive(Debug, Clone)]
pub struct PgProjectionStore {
    pool: PgPool,
}

impl PgProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bump_cursors(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), ProjectionError> {
        for name in PROJECTIONS {
            sqlx::query(
                r#"
                INSERT INTO projection_cursors (projection_name, events_processed)
                VALUES ($1, 1)
                ON CONFLICT (projection_name)
                DO UPDATE SET events_processed = projection_cursors.events_processed + 1
                "#,
            )
            .bind(name)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn apply_change(&self, change: &ProjectionChange) -> Result<ApplyOutcome, ProjectionError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM account_summaries WHERE account_id = $1 FOR UPDATE",
        )
        .bind(&change.aggregate_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = current.unwrap_or(0);

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
                // Two first applies can race past the row lock when no row exists yet
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO account_summaries
                        (account_id, owner_name, currency, balance, status, version)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (account_id) DO NOTHING
                    "#,
                )
                .bind(&change.aggregate_id)
                .bind(owner_name)
                .bind(currency)
                .bind(initial_balance)
                .bind(AccountStatus::Open.to_string())
                .bind(change.sequence_number)
                .execute(&mut *tx)
                .await?;

                if inserted.rows_affected() == 0 {
                    return Ok(ApplyOutcome::AlreadyApplied);
                }
            }
            ChangeKind::Moved {
                kind,
                transaction_id,
                amount,
                description,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE account_summaries
                    SET balance = balance + $2, version = $3
                    WHERE account_id = $1
                    "#,
                )
                .bind(&change.aggregate_id)
                .bind(change.balance_delta())
                .bind(change.sequence_number)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(ProjectionError::MissingSummary(change.aggregate_id.clone()));
                }

                sqlx::query(
                    r#"
                    INSERT INTO transaction_history (
                        transaction_id, account_id, kind, amount,
                        description, sequence_number, occurred_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (transaction_id) DO NOTHING
                    "#,
                )
                .bind(transaction_id)
                .bind(&change.aggregate_id)
                .bind(kind.to_string())
                .bind(amount)
                .bind(description)
                .bind(change.sequence_number)
                .bind(change.timestamp)
                .execute(&mut *tx)
                .await?;
            }
            ChangeKind::Closed => {
                let updated = sqlx::query(
                    r#"
                    UPDATE account_summaries
                    SET status = $2, version = $3
                    WHERE account_id = $1
                    "#,
                )
                .bind(&change.aggregate_id)
                .bind(AccountStatus::Closed.to_string())
                .bind(change.sequence_number)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(ProjectionError::MissingSummary(change.aggregate_id.clone()));
                }
            }
        }

        self.bump_cursors(&mut tx).await?;
        tx.commit().await?;

        Ok(ApplyOutcome::Applied)
    }

    async fn summary(&self, account_id: &str) -> Result<Option<AccountSummary>, ProjectionError> {
        let row: Option<SummaryRow> = sqlx::query_as(
            r#"
            SELECT account_id, owner_name, currency, balance, status, version
            FROM account_summaries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(summary_from_row).transpose()
    }

    async fn summaries(&self) -> Result<Vec<AccountSummary>, ProjectionError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT account_id, owner_name, currency, balance, status, version
            FROM account_summaries
            ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(summary_from_row).collect()
    }

    async fn transactions(
        &self,
        account_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionHistoryEntry>, ProjectionError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT transaction_id, account_id, kind, amount,
                   description, sequence_number, occurred_at
            FROM transaction_history
            WHERE account_id = $1
            ORDER BY occurred_at DESC, sequence_number DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }

    async fn transaction_count(&self, account_id: &str) -> Result<i64, ProjectionError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transaction_history WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total)
    }

    async fn cursors(&self) -> Result<Vec<ProjectionCursor>, ProjectionError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT projection_name, events_processed FROM projection_cursors",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(PROJECTIONS
            .iter()
            .map(|name| ProjectionCursor {
                name: name.to_string(),
                events_processed: rows
                    .iter()
                    .find(|(row_name, _)| row_name == name)
                    .map(|(_, processed)| *processed)
                    .unwrap_or(0),
            })
            .collect())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("TRUNCATE account_summaries, transaction_history")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE projection_cursors SET events_processed = 0")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
