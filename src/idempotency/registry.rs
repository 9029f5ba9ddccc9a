//! In-memory transaction registry
//!
//! Mutated only while the in-memory event store holds its write lock, which
//! makes reserve/append/commit a single critical section.

use std::collections::HashMap;

use crate::event_store::{Event, EventStoreError};

use super::{TransactionRecord, TransactionStatus};

#[derive(Debug, Default)]
pub struct TransactionRegistry {
    records: HashMap<String, TransactionRecord>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a transaction id, failing if it was already seen
    pub fn check_and_reserve(
        &mut self,
        transaction_id: &str,
        aggregate_id: &str,
    ) -> Result<(), EventStoreError> {
        if self.records.contains_key(transaction_id) {
            return Err(EventStoreError::DuplicateTransaction(
                transaction_id.to_string(),
            ));
        }

        self.records.insert(
            transaction_id.to_string(),
            TransactionRecord {
                transaction_id: transaction_id.to_string(),
                aggregate_id: aggregate_id.to_string(),
                status: TransactionStatus::Reserved,
                event_id: None,
                sequence_number: None,
            },
        );
        Ok(())
    }

    /// Finalize a reservation with the event it produced
    pub fn commit(&mut self, transaction_id: &str, event: &Event) {
        if let Some(record) = self.records.get_mut(transaction_id) {
            record.status = TransactionStatus::Committed;
            record.event_id = Some(event.event_id);
            record.sequence_number = Some(event.sequence_number);
        }
    }

    /// Drop a reservation whose append did not go through
    pub fn release(&mut self, transaction_id: &str) {
        if matches!(
            self.records.get(transaction_id),
            Some(record) if record.status == TransactionStatus::Reserved
        ) {
            self.records.remove(transaction_id);
        }
    }

    pub fn find(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.records.get(transaction_id).cloned()
    }
}
