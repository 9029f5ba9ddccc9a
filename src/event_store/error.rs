//! Event Store Errors
//!
//! Error types for event store operations.

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream head moved
    #[error("Concurrency conflict for aggregate {aggregate_id}: expected sequence {expected}, stream head is {actual}")]
    ConcurrencyConflict {
        aggregate_id: String,
        expected: i64,
        actual: i64,
    },

    /// Transaction id was already reserved or committed
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Check if replaying the command may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_concurrency_conflict()
    }
}
