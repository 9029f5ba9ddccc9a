//! Projection module
//!
//! Denormalized read models derived from the event log:
//! `AccountSummaries` (one row per account) and `TransactionHistory`
//! (one immutable row per deposit or withdrawal). Both can be dropped and
//! rebuilt from the log at any time.

mod engine;
mod memory;
mod rebuild;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{AccountStatus, FoldError};
use crate::domain::AccountEvent;
use crate::event_store::{Event, EventStoreError};

pub use engine::{FailedStream, ProjectionEngine, RebuildReport};
pub use memory::InMemoryProjectionStore;
pub use rebuild::{RebuildHandle, RebuildPhase, RebuildProgress};
pub use repository::PgProjectionStore;

pub const ACCOUNT_SUMMARIES: &str = "AccountSummaries";
pub const TRANSACTION_HISTORY: &str = "TransactionHistory";

/// Every projection maintained by the engine, in reporting order
pub const PROJECTIONS: [&str; 2] = [ACCOUNT_SUMMARIES, TRANSACTION_HISTORY];

/// Current state of one account as seen by the read model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account_id: String,
    pub owner_name: String,
    pub currency: String,
    pub balance: Decimal,
    pub status: AccountStatus,
    /// Sequence number of the last applied event
    pub version: i64,
}

/// Direction of a money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Deposit,
    Withdraw,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Deposit => write!(f, "DEPOSIT"),
            EntryKind::Withdraw => write!(f, "WITHDRAW"),
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(EntryKind::Deposit),
            "WITHDRAW" => Ok(EntryKind::Withdraw),
            other => Err(format!("unknown entry kind {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistoryEntry {
    pub transaction_id: String,
    pub account_id: String,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub description: Option<String>,
    pub sequence_number: i64,
    /// Timestamp of the originating event
    pub timestamp: DateTime<Utc>,
}

/// What one event does to the read models
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Opened {
        owner_name: String,
        currency: String,
        initial_balance: Decimal,
    },
    Moved {
        kind: EntryKind,
        transaction_id: String,
        amount: Decimal,
        description: Option<String>,
    },
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionChange {
    pub aggregate_id: String,
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
}

impl ProjectionChange {
    pub fn from_event(event: &Event) -> Result<Self, ProjectionError> {
        let decoded = AccountEvent::decode(&event.event_type, &event.payload).map_err(|e| {
            ProjectionError::Decode {
                aggregate_id: event.aggregate_id.clone(),
                sequence_number: event.sequence_number,
                source: e.into(),
            }
        })?;

        let kind = match decoded {
            AccountEvent::AccountCreated(data) => ChangeKind::Opened {
                owner_name: data.owner_name,
                currency: data.currency,
                initial_balance: data.initial_balance,
            },
            AccountEvent::MoneyDeposited(data) => ChangeKind::Moved {
                kind: EntryKind::Deposit,
                transaction_id: data.transaction_id,
                amount: data.amount,
                description: data.description,
            },
            AccountEvent::MoneyWithdrawn(data) => ChangeKind::Moved {
                kind: EntryKind::Withdraw,
                transaction_id: data.transaction_id,
                amount: data.amount,
                description: data.description,
            },
            AccountEvent::AccountClosed => ChangeKind::Closed,
        };

        Ok(Self {
            aggregate_id: event.aggregate_id.clone(),
            sequence_number: event.sequence_number,
            timestamp: event.timestamp,
            kind,
        })
    }

    /// Signed effect on the balance
    fn balance_delta(&self) -> Decimal {
        match &self.kind {
            ChangeKind::Opened { initial_balance, .. } => *initial_balance,
            ChangeKind::Moved { kind: EntryKind::Deposit, amount, .. } => *amount,
            ChangeKind::Moved { kind: EntryKind::Withdraw, amount, .. } => -*amount,
            ChangeKind::Closed => Decimal::ZERO,
        }
    }
}

/// Result of applying one change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The summary already covers this sequence number
    AlreadyApplied,
    /// The change is ahead of the summary; earlier events are missing
    Gap { current_version: i64 },
}

/// Number of events a projection has applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCursor {
    pub name: String,
    pub events_processed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionLag {
    pub name: String,
    pub last_processed: i64,
    pub lag: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionStatus {
    pub total_events: i64,
    pub projections: Vec<ProjectionLag>,
}

/// Read-model storage. `apply_change` must be atomic: the summary, the
/// history row and the cursors move together or not at all.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn apply_change(&self, change: &ProjectionChange) -> Result<ApplyOutcome, ProjectionError>;

    async fn summary(&self, account_id: &str) -> Result<Option<AccountSummary>, ProjectionError>;

    async fn summaries(&self) -> Result<Vec<AccountSummary>, ProjectionError>;

    /// History of one account, newest first
    async fn transactions(
        &self,
        account_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionHistoryEntry>, ProjectionError>;

    async fn transaction_count(&self, account_id: &str) -> Result<i64, ProjectionError>;

    async fn cursors(&self) -> Result<Vec<ProjectionCursor>, ProjectionError>;

    /// Drop every row of both projections and zero the cursors
    async fn reset(&self) -> Result<(), ProjectionError>;
}

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cannot project event {sequence_number} of {aggregate_id}: {source}")]
    Decode {
        aggregate_id: String,
        sequence_number: i64,
        #[source]
        source: FoldError,
    },

    #[error("Projection gap for {aggregate_id}: expected {expected}, found {found}")]
    Gap {
        aggregate_id: String,
        expected: i64,
        found: i64,
    },

    #[error("No summary for {0}")]
    MissingSummary(String),

    #[error("Corrupt projection row: {0}")]
    Corrupt(String),

    #[error("Rebuild cancelled")]
    Cancelled,

    #[error("Rebuild task failed: {0}")]
    TaskFailed(String),
}

impl ProjectionError {
    /// Faults confined to one stream; other streams can still be projected
    pub fn is_stream_fault(&self) -> bool {
        matches!(
            self,
            ProjectionError::Decode { .. }
                | ProjectionError::Gap { .. }
                | ProjectionError::MissingSummary(_)
                | ProjectionError::Corrupt(_)
        )
    }
}
