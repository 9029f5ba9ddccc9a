//! Transaction deduplication
//!
//! Guarantees that a client-supplied transaction id produces at most one
//! ledger event. A transaction id is first reserved and then committed with
//! the event it produced; both steps run inside the event store's append so
//! the triple {reserve, append, commit} is one atomic unit.

mod registry;
mod repository;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_store::EventStoreError;

pub use registry::TransactionRegistry;
pub use repository::PgTransactionDeduplicator;

/// Processing state of a transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Reserved,
    Committed,
}

impl TryFrom<String> for TransactionStatus {
    type Error = EventStoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "reserved" => Ok(TransactionStatus::Reserved),
            "committed" => Ok(TransactionStatus::Committed),
            other => Err(EventStoreError::InvalidEventData(format!(
                "unknown transaction status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Reserved => write!(f, "reserved"),
            TransactionStatus::Committed => write!(f, "committed"),
        }
    }
}

/// A processed (or in-flight) transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub aggregate_id: String,
    pub status: TransactionStatus,
    pub event_id: Option<Uuid>,
    pub sequence_number: Option<i64>,
}

impl TransactionRecord {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}
