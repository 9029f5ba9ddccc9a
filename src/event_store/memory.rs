//! In-memory Event Store
//!
//! Single-process backend used by tests and local runs. One mutex guards the
//! log, the per-stream index and the transaction registry, so every append is
//! one critical section with the same all-or-nothing contract as PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::idempotency::{TransactionRecord, TransactionRegistry};

use super::{check_expected_sequence, Event, EventStore, EventStoreError, NewEvent, StreamHead};

#[derive(Debug, Default)]
struct MemoryLog {
    /// Global append order
    events: Vec<Event>,
    /// Positions into `events`, per aggregate, in sequence order
    streams: HashMap<String, Vec<usize>>,
    transactions: TransactionRegistry,
}

impl MemoryLog {
    fn stream(&self, aggregate_id: &str) -> impl Iterator<Item = &Event> {
        self.streams
            .get(aggregate_id)
            .into_iter()
            .flatten()
            .map(|&position| &self.events[position])
    }

    fn head(&self, aggregate_id: &str) -> Option<&Event> {
        self.streams
            .get(aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&position| &self.events[position])
    }

    fn try_append(
        &mut self,
        event: &NewEvent,
        expected_sequence: i64,
    ) -> Result<Event, EventStoreError> {
        let (current, last_at) = match self.head(&event.aggregate_id) {
            Some(head) => (head.sequence_number, Some(head.timestamp)),
            None => (0, None),
        };

        if current != expected_sequence - 1 {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id.clone(),
                expected: expected_sequence,
                actual: current,
            });
        }

        let now = Utc::now();
        let timestamp = match last_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };

        let stored = Event {
            event_id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            sequence_number: expected_sequence,
            timestamp,
            schema_version: event.schema_version,
        };

        let position = self.events.len();
        self.events.push(stored.clone());
        self.streams
            .entry(stored.aggregate_id.clone())
            .or_default()
            .push(position);

        Ok(stored)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: Mutex<MemoryLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        event: NewEvent,
        expected_sequence: i64,
    ) -> Result<Event, EventStoreError> {
        check_expected_sequence(&event.aggregate_id, expected_sequence)?;

        let mut log = self.log.lock().await;

        if let Some(transaction_id) = &event.transaction_id {
            log.transactions
                .check_and_reserve(transaction_id, &event.aggregate_id)?;
        }

        match log.try_append(&event, expected_sequence) {
            Ok(stored) => {
                if let Some(transaction_id) = &event.transaction_id {
                    log.transactions.commit(transaction_id, &stored);
                }
                Ok(stored)
            }
            Err(e) => {
                if let Some(transaction_id) = &event.transaction_id {
                    log.transactions.release(transaction_id);
                }
                Err(e)
            }
        }
    }

    async fn load(
        &self,
        aggregate_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<Event>, EventStoreError> {
        let log = self.log.lock().await;
        Ok(log
            .stream(aggregate_id)
            .filter(|event| event.sequence_number > after_sequence)
            .cloned()
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<Event>, EventStoreError> {
        Ok(self.log.lock().await.events.clone())
    }

    async fn load_up_to(
        &self,
        aggregate_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError> {
        let log = self.log.lock().await;
        Ok(log
            .stream(aggregate_id)
            .filter(|event| event.timestamp <= at)
            .cloned()
            .collect())
    }

    async fn current_sequence(&self, aggregate_id: &str) -> Result<i64, EventStoreError> {
        let log = self.log.lock().await;
        Ok(log
            .head(aggregate_id)
            .map(|event| event.sequence_number)
            .unwrap_or(0))
    }

    async fn count(&self) -> Result<i64, EventStoreError> {
        Ok(self.log.lock().await.events.len() as i64)
    }

    async fn stream_heads(&self) -> Result<Vec<StreamHead>, EventStoreError> {
        let log = self.log.lock().await;
        let mut heads: Vec<StreamHead> = log
            .streams
            .keys()
            .filter_map(|aggregate_id| {
                log.head(aggregate_id).map(|event| StreamHead {
                    aggregate_id: aggregate_id.clone(),
                    sequence_number: event.sequence_number,
                })
            })
            .collect();
        heads.sort_by(|a, b| a.aggregate_id.cmp(&b.aggregate_id));
        Ok(heads)
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, EventStoreError> {
        Ok(self.log.lock().await.transactions.find(transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn new_event(aggregate_id: &str, transaction_id: Option<&str>) -> NewEvent {
        NewEvent {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: "BankAccount".to_string(),
            event_type: "MoneyDeposited".to_string(),
            payload: json!({ "amount": 1, "transactionId": transaction_id }),
            schema_version: 1,
            transaction_id: transaction_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_contiguous_sequence() {
        let store = InMemoryEventStore::new();

        let first = store.append(new_event("acc1", None), 1).await.unwrap();
        let second = store.append(new_event("acc1", None), 2).await.unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(store.current_sequence("acc1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_expected_sequence_conflicts_and_writes_nothing() {
        let store = InMemoryEventStore::new();
        store.append(new_event("acc1", None), 1).await.unwrap();

        let stale = store.append(new_event("acc1", None), 1).await;
        assert!(matches!(
            stale,
            Err(EventStoreError::ConcurrencyConflict { expected: 1, actual: 1, .. })
        ));

        let ahead = store.append(new_event("acc1", None), 5).await;
        assert!(matches!(ahead, Err(EventStoreError::ConcurrencyConflict { .. })));

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflict_releases_reservation() {
        let store = InMemoryEventStore::new();
        store.append(new_event("acc1", None), 1).await.unwrap();

        let conflict = store.append(new_event("acc1", Some("t1")), 7).await;
        assert!(conflict.is_err());
        assert!(store.find_transaction("t1").await.unwrap().is_none());

        store.append(new_event("acc1", Some("t1")), 2).await.unwrap();
        let record = store.find_transaction("t1").await.unwrap().unwrap();
        assert!(record.is_committed());
        assert_eq!(record.sequence_number, Some(2));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let store = InMemoryEventStore::new();
        store.append(new_event("acc1", Some("t1")), 1).await.unwrap();

        let duplicate = store.append(new_event("acc1", Some("t1")), 2).await;
        assert!(matches!(duplicate, Err(EventStoreError::DuplicateTransaction(_))));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_same_sequence_one_wins() {
        let store = Arc::new(InMemoryEventStore::new());
        store.append(new_event("acc1", None), 1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(new_event("acc1", None), 2).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) if e.is_concurrency_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_load_variants() {
        let store = InMemoryEventStore::new();
        let first = store.append(new_event("acc1", None), 1).await.unwrap();
        store.append(new_event("acc2", None), 1).await.unwrap();
        store.append(new_event("acc1", None), 2).await.unwrap();

        let after_one = store.load("acc1", 1).await.unwrap();
        assert_eq!(after_one.len(), 1);
        assert_eq!(after_one[0].sequence_number, 2);

        let all = store.load_all().await.unwrap();
        let order: Vec<_> = all.iter().map(|e| (e.aggregate_id.as_str(), e.sequence_number)).collect();
        assert_eq!(order, vec![("acc1", 1), ("acc2", 1), ("acc1", 2)]);

        let up_to_first = store.load_up_to("acc1", first.timestamp).await.unwrap();
        assert_eq!(up_to_first.len(), 1);

        let heads = store.stream_heads().await.unwrap();
        assert_eq!(
            heads,
            vec![
                StreamHead { aggregate_id: "acc1".to_string(), sequence_number: 2 },
                StreamHead { aggregate_id: "acc2".to_string(), sequence_number: 1 },
            ]
        );

        assert!(store.load("missing", 0).await.unwrap().is_empty());
    }
}
