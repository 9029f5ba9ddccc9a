//! PostgreSQL Event Store
//!
//! Each append runs in one transaction:
//! reserve transaction id, verify stream head, insert event, commit reservation.
//! The `(aggregate_id, sequence_number)` primary key is the final arbiter when
//! two writers race past the head check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::idempotency::{PgTransactionDeduplicator, TransactionRecord};

use super::{check_expected_sequence, Event, EventStore, EventStoreError, NewEvent, StreamHead};

const UNIQUE_VIOLATION: &str = "23505";

type EventRow = (
    Uuid,
    String,
    String,
    String,
    serde_json::Value,
    i64,
    DateTime<Utc>,
    i32,
);

fn from_row(
    (event_id, aggregate_id, aggregate_type, event_type, payload, sequence_number, timestamp, schema_version): EventRow,
) -> Event {
    Event {
        event_id,
        aggregate_id,
        aggregate_type,
        event_type,
        payload,
        sequence_number,
        timestamp,
        schema_version,
    }
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    dedup: PgTransactionDeduplicator,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            dedup: PgTransactionDeduplicator::new(pool.clone()),
            pool,
        }
    }

    /// Current head of a stream as seen by the append transaction
    async fn stream_head(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<(i64, Option<DateTime<Utc>>), EventStoreError> {
        let (sequence, last_at): (Option<i64>, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT MAX(sequence_number), MAX(occurred_at)
            FROM events
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok((sequence.unwrap_or(0), last_at))
    }

    async fn insert_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &NewEvent,
        sequence_number: i64,
        last_at: Option<DateTime<Utc>>,
    ) -> Result<Event, EventStoreError> {
        let event_id = Uuid::new_v4();

        // Timestamps are strictly increasing within a stream so that
        // "timestamp <= T" always selects a prefix.
        let inserted: Result<(DateTime<Utc>,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO events (
                event_id, aggregate_id, aggregate_type, event_type,
                payload, sequence_number, occurred_at, schema_version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                GREATEST(clock_timestamp(), $7::timestamptz + INTERVAL '1 microsecond'),
                $8
            )
            RETURNING occurred_at
            "#,
        )
        .bind(event_id)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(sequence_number)
        .bind(last_at)
        .bind(event.schema_version)
        .fetch_one(&mut **tx)
        .await;

        let (timestamp,) = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: event.aggregate_id.clone(),
                    expected: sequence_number,
                    actual: sequence_number,
                });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Event {
            event_id,
            aggregate_id: event.aggregate_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            sequence_number,
            timestamp,
            schema_version: event.schema_version,
        })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(
        &self,
        event: NewEvent,
        expected_sequence: i64,
    ) -> Result<Event, EventStoreError> {
        check_expected_sequence(&event.aggregate_id, expected_sequence)?;

        let mut tx = self.pool.begin().await?;

        if let Some(transaction_id) = &event.transaction_id {
            self.dedup
                .check_and_reserve(&mut tx, transaction_id, &event.aggregate_id)
                .await?;
        }

        let (current, last_at) = self.stream_head(&mut tx, &event.aggregate_id).await?;
        if current != expected_sequence - 1 {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id.clone(),
                expected: expected_sequence,
                actual: current,
            });
        }

        let stored = self
            .insert_event(&mut tx, &event, expected_sequence, last_at)
            .await?;

        if let Some(transaction_id) = &event.transaction_id {
            self.dedup.commit(&mut tx, transaction_id, &stored).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            aggregate_id = %stored.aggregate_id,
            sequence_number = stored.sequence_number,
            event_type = %stored.event_type,
            "Event appended"
        );

        Ok(stored)
    }

    async fn load(
        &self,
        aggregate_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type,
                   payload, sequence_number, occurred_at, schema_version
            FROM events
            WHERE aggregate_id = $1 AND sequence_number > $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(after_sequence)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn load_all(&self) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type,
                   payload, sequence_number, occurred_at, schema_version
            FROM events
            ORDER BY global_position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn load_up_to(
        &self,
        aggregate_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type,
                   payload, sequence_number, occurred_at, schema_version
            FROM events
            WHERE aggregate_id = $1 AND occurred_at <= $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn current_sequence(&self, aggregate_id: &str) -> Result<i64, EventStoreError> {
        let sequence: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence_number) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(sequence.unwrap_or(0))
    }

    async fn count(&self) -> Result<i64, EventStoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn stream_heads(&self) -> Result<Vec<StreamHead>, EventStoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT aggregate_id, MAX(sequence_number)
            FROM events
            GROUP BY aggregate_id
            ORDER BY aggregate_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(aggregate_id, sequence_number)| StreamHead {
                aggregate_id,
                sequence_number,
            })
            .collect())
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, EventStoreError> {
        self.dedup.find(transaction_id).await
    }
}
