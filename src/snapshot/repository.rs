//! PostgreSQL snapshot store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn get(&self, aggregate_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let row: Option<(String, serde_json::Value, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT aggregate_id, state, last_sequence_number, taken_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(aggregate_id, state, last_sequence_number, taken_at)| Snapshot {
                aggregate_id,
                state,
                last_sequence_number,
                taken_at,
            },
        ))
    }

    async fn put(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, state, last_sequence_number, taken_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET state = $2, last_sequence_number = $3, taken_at = $4
            WHERE snapshots.last_sequence_number <= EXCLUDED.last_sequence_number
            "#,
        )
        .bind(&snapshot.aggregate_id)
        .bind(&snapshot.state)
        .bind(snapshot.last_sequence_number)
        .bind(snapshot.taken_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, aggregate_id: &str) -> Result<(), SnapshotError> {
        sqlx::query("DELETE FROM snapshots WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
