//! PostgreSQL transaction deduplicator
//!
//! Reservation is an `INSERT ... ON CONFLICT DO NOTHING` on the
//! `processed_transactions` primary key, issued inside the append transaction.
//! A concurrent duplicate blocks on the key until the first writer commits or
//! rolls back, then either sees the row (duplicate) or takes the reservation.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::event_store::{Event, EventStoreError};

use super::{TransactionRecord, TransactionStatus};

#[derive(Debug, Clone)]
pub struct PgTransactionDeduplicator {
    pool: PgPool,
}

impl PgTransactionDeduplicator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // check_and_reserve
    // =========================================================================

    /// Reserve a transaction id, failing if it was already seen
    pub async fn check_and_reserve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: &str,
        aggregate_id: &str,
    ) -> Result<(), EventStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_transactions (transaction_id, aggregate_id, status)
            VALUES ($1, $2, 'reserved')
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(transaction_id)
        .bind(aggregate_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(EventStoreError::DuplicateTransaction(
                transaction_id.to_string(),
            ));
        }

        Ok(())
    }

    // =========================================================================
    // commit
    // =========================================================================

    /// Finalize a reservation with the event it produced
    pub async fn commit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: &str,
        event: &Event,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            UPDATE processed_transactions
            SET status = 'committed', event_id = $2, sequence_number = $3, committed_at = NOW()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(event.event_id)
        .bind(event.sequence_number)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Look up a transaction id outside of any append
    pub async fn find(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, EventStoreError> {
        let row: Option<(String, String, String, Option<Uuid>, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT transaction_id, aggregate_id, status, event_id, sequence_number
            FROM processed_transactions
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(transaction_id, aggregate_id, status, event_id, sequence_number)| -> Result<TransactionRecord, EventStoreError> {
                Ok(TransactionRecord {
                    transaction_id,
                    aggregate_id,
                    status: TransactionStatus::try_from(status)?,
                    event_id,
                    sequence_number,
                })
            },
        )
        .transpose()
    }
}
