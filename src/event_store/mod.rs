//! Event Store module
//!
//! Append-only, per-aggregate ordered event log with optimistic concurrency.
//! The store owns sequence numbers and timestamps; callers only state which
//! sequence number they expect the new event to receive.

mod error;
mod memory;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{AccountEvent, BANK_ACCOUNT, SCHEMA_VERSION};
use crate::idempotency::TransactionRecord;

pub use error::EventStoreError;
pub use memory::InMemoryEventStore;
pub use repository::PgEventStore;

/// A persisted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub schema_version: i32,
}

/// An event about to be appended
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub schema_version: i32,
    /// Reserved and committed atomically with the append when present
    pub transaction_id: Option<String>,
}

impl NewEvent {
    /// Encode an account event for the given stream
    pub fn account(aggregate_id: &str, event: &AccountEvent) -> Result<Self, EventStoreError> {
        Ok(Self {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: BANK_ACCOUNT.to_string(),
            event_type: event.event_type().to_string(),
            payload: event.payload()?,
            schema_version: SCHEMA_VERSION,
            transaction_id: event.transaction_id().map(str::to_string),
        })
    }
}

/// Latest sequence number of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    pub aggregate_id: String,
    pub sequence_number: i64,
}

/// Storage contract for the event log
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. Fails with `ConcurrencyConflict` unless the stream's
    /// current maximum sequence number is exactly `expected_sequence - 1`.
    async fn append(
        &self,
        event: NewEvent,
        expected_sequence: i64,
    ) -> Result<Event, EventStoreError>;

    /// Events with `sequence_number > after_sequence`, ascending
    async fn load(
        &self,
        aggregate_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<Event>, EventStoreError>;

    /// Every event in global append order
    async fn load_all(&self) -> Result<Vec<Event>, EventStoreError>;

    /// Events of one stream with `timestamp <= at`, ascending
    async fn load_up_to(
        &self,
        aggregate_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError>;

    /// Highest sequence number of a stream (0 when empty)
    async fn current_sequence(&self, aggregate_id: &str) -> Result<i64, EventStoreError>;

    /// Total number of events in the store
    async fn count(&self) -> Result<i64, EventStoreError>;

    async fn stream_heads(&self) -> Result<Vec<StreamHead>, EventStoreError>;

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, EventStoreError>;
}

fn check_expected_sequence(aggregate_id: &str, expected_sequence: i64) -> Result<(), EventStoreError> {
    if expected_sequence < 1 {
        return Err(EventStoreError::InvalidEventData(format!(
            "expected sequence for {} must be at least 1 (got {})",
            aggregate_id, expected_sequence
        )));
    }
    Ok(())
}
