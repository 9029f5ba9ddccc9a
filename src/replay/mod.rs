//! Aggregate replay
//!
//! Reconstructs aggregate state by folding events strictly in sequence order,
//! optionally starting from a snapshot. Time-travel replays always start from
//! genesis because snapshots describe "now", not a historical cut.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::aggregate::{Aggregate, FoldError};
use crate::event_store::{Event, EventStore, EventStoreError};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};

/// Fold `events` onto `initial`. Every event must carry the sequence number
/// directly after the state's current version.
pub fn fold<A: Aggregate>(initial: A, events: &[Event]) -> Result<A, FoldError> {
    events.iter().try_fold(initial, |state, event| {
        let expected = state.version() + 1;
        if event.sequence_number != expected {
            return Err(FoldError::SequenceGap {
                expected,
                found: event.sequence_number,
            });
        }
        state.apply(A::decode(event)?)
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The stored stream is malformed; processing of the aggregate halts
    #[error("Invariant violation in {aggregate_id}: {source}")]
    InvariantViolation {
        aggregate_id: String,
        #[source]
        source: FoldError,
    },

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Clone)]
pub struct AggregateReplayer {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl AggregateReplayer {
    pub fn new(events: Arc<dyn EventStore>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { events, snapshots }
    }

    /// Current state: latest snapshot plus the events after it.
    /// `None` when the stream has no events.
    pub async fn replay<A: Aggregate>(&self, aggregate_id: &str) -> Result<Option<A>, ReplayError> {
        let base = match self.snapshots.get(aggregate_id).await? {
            Some(snapshot) => match restore::<A>(&snapshot) {
                Ok(state) => Some(state),
                Err(reason) => {
                    tracing::warn!(
                        aggregate_id = %aggregate_id,
                        last_sequence_number = snapshot.last_sequence_number,
                        reason = %reason,
                        "Ignoring unusable snapshot, replaying from genesis"
                    );
                    None
                }
            },
            None => None,
        };

        let after = base.as_ref().map(|state| state.version()).unwrap_or(0);
        let events = self.events.load(aggregate_id, after).await?;

        match base {
            Some(state) => self.fold_into(aggregate_id, state, &events).map(Some),
            None if events.is_empty() => Ok(None),
            None => self
                .fold_into(aggregate_id, A::empty(aggregate_id), &events)
                .map(Some),
        }
    }

    /// Current state from genesis, ignoring snapshots
    pub async fn replay_from_genesis<A: Aggregate>(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<A>, ReplayError> {
        let events = self.events.load(aggregate_id, 0).await?;
        if events.is_empty() {
            return Ok(None);
        }
        self.fold_into(aggregate_id, A::empty(aggregate_id), &events)
            .map(Some)
    }

    /// State as of `at`: events with `timestamp <= at` only.
    /// `None` when no event of the stream is that old.
    pub async fn replay_as_of<A: Aggregate>(
        &self,
        aggregate_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<A>, ReplayError> {
        let events = self.events.load_up_to(aggregate_id, at).await?;
        if events.is_empty() {
            return Ok(None);
        }
        self.fold_into(aggregate_id, A::empty(aggregate_id), &events)
            .map(Some)
    }

    fn fold_into<A: Aggregate>(
        &self,
        aggregate_id: &str,
        initial: A,
        events: &[Event],
    ) -> Result<A, ReplayError> {
        fold(initial, events).map_err(|source| {
            tracing::error!(
                aggregate_id = %aggregate_id,
                error = %source,
                "Event stream violates aggregate invariants"
            );
            ReplayError::InvariantViolation {
                aggregate_id: aggregate_id.to_string(),
                source,
            }
        })
    }
}

/// Decode a snapshot, rejecting one that disagrees with its own metadata
fn restore<A: Aggregate>(snapshot: &Snapshot) -> Result<A, String> {
    let state: A = serde_json::from_value(snapshot.state.clone()).map_err(|e| e.to_string())?;

    if state.id() != snapshot.aggregate_id {
        return Err(format!(
            "state belongs to {}, not {}",
            state.id(),
            snapshot.aggregate_id
        ));
    }
    if state.version() != snapshot.last_sequence_number || state.version() < 1 {
        return Err(format!(
            "state version {} does not match last sequence number {}",
            state.version(),
            snapshot.last_sequence_number
        ));
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::BankAccount;
    use crate::domain::{AccountEvent, AccountOpened, MoneyMoved};
    use crate::event_store::{InMemoryEventStore, NewEvent};
    use crate::snapshot::InMemorySnapshotStore;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn stored(sequence_number: i64, event: &AccountEvent) -> Event {
        Event {
            event_id: uuid::Uuid::new_v4(),
            aggregate_id: "acc1".to_string(),
            aggregate_type: "BankAccount".to_string(),
            event_type: event.event_type().to_string(),
            payload: event.payload().unwrap(),
            sequence_number,
            timestamp: Utc::now(),
            schema_version: 1,
        }
    }

    fn created(initial: Decimal) -> AccountEvent {
        AccountEvent::AccountCreated(AccountOpened {
            owner_name: "Alice".to_string(),
            currency: "USD".to_string(),
            initial_balance: initial,
        })
    }

    fn deposit(amount: Decimal, transaction_id: &str) -> AccountEvent {
        AccountEvent::MoneyDeposited(MoneyMoved {
            amount,
            transaction_id: transaction_id.to_string(),
            description: None,
        })
    }

    fn withdraw(amount: Decimal, transaction_id: &str) -> AccountEvent {
        AccountEvent::MoneyWithdrawn(MoneyMoved {
            amount,
            transaction_id: transaction_id.to_string(),
            description: None,
        })
    }

    fn replayer() -> (Arc<InMemoryEventStore>, Arc<InMemorySnapshotStore>, AggregateReplayer) {
        let events = Arc::new(InMemoryEventStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let replayer = AggregateReplayer::new(events.clone(), snapshots.clone());
        (events, snapshots, replayer)
    }

    #[test]
    fn test_fold_balance() {
        let events = vec![
            stored(1, &created(dec!(100))),
            stored(2, &deposit(dec!(50), "t1")),
            stored(3, &withdraw(dec!(30), "t2")),
        ];

        let state = fold(BankAccount::empty("acc1"), &events).unwrap();
        assert_eq!(state.balance().value(), dec!(120));
        assert_eq!(state.version(), 3);
    }

    #[test]
    fn test_fold_detects_gap() {
        let events = vec![stored(1, &created(dec!(0))), stored(3, &deposit(dec!(5), "t1"))];

        let result = fold(BankAccount::empty("acc1"), &events);
        assert_eq!(result, Err(FoldError::SequenceGap { expected: 2, found: 3 }));
    }

    #[test]
    fn test_fold_unknown_event_type_is_fatal() {
        let mut odd = stored(2, &deposit(dec!(5), "t1"));
        odd.event_type = "InterestAccrued".to_string();
        let events = vec![stored(1, &created(dec!(0))), odd];

        let result = fold(BankAccount::empty("acc1"), &events);
        assert_eq!(
            result,
            Err(FoldError::UnknownEventType("InterestAccrued".to_string()))
        );
    }

    #[tokio::test]
    async fn test_replay_missing_stream_is_none() {
        let (_, _, replayer) = replayer();
        let state: Option<BankAccount> = replayer.replay("nobody").await.unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_replay_reports_invariant_violation() {
        let (events, _, replayer) = replayer();
        events
            .append(NewEvent::account("acc1", &deposit(dec!(5), "t1")).unwrap(), 1)
            .await
            .unwrap();

        let result = replayer.replay::<BankAccount>("acc1").await;
        assert!(matches!(
            result,
            Err(ReplayError::InvariantViolation { source: FoldError::NotCreated(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_replay_uses_snapshot_and_tail() {
        let (events, snapshots, replayer) = replayer();
        events
            .append(NewEvent::account("acc1", &created(dec!(10))).unwrap(), 1)
            .await
            .unwrap();
        events
            .append(NewEvent::account("acc1", &deposit(dec!(5), "t1")).unwrap(), 2)
            .await
            .unwrap();

        // A snapshot claiming a different balance proves the replay started from it
        let mut at_two = replayer
            .replay_from_genesis::<BankAccount>("acc1")
            .await
            .unwrap()
            .unwrap();
        let mut state = serde_json::to_value(&at_two).unwrap();
        state["balance"] = json!("1000");
        snapshots
            .put(Snapshot {
                aggregate_id: "acc1".to_string(),
                state,
                last_sequence_number: 2,
                taken_at: Utc::now(),
            })
            .await
            .unwrap();

        events
            .append(NewEvent::account("acc1", &deposit(dec!(1), "t2")).unwrap(), 3)
            .await
            .unwrap();

        let replayed: BankAccount = replayer.replay("acc1").await.unwrap().unwrap();
        assert_eq!(replayed.balance().value(), dec!(1001));
        assert_eq!(replayed.version(), 3);

        at_two = replayer.replay_from_genesis("acc1").await.unwrap().unwrap();
        assert_eq!(at_two.balance().value(), dec!(16));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_falls_back_to_genesis() {
        let (events, snapshots, replayer) = replayer();
        events
            .append(NewEvent::account("acc1", &created(dec!(10))).unwrap(), 1)
            .await
            .unwrap();

        snapshots
            .put(Snapshot {
                aggregate_id: "acc1".to_string(),
                state: json!({ "garbage": true }),
                last_sequence_number: 1,
                taken_at: Utc::now(),
            })
            .await
            .unwrap();

        let state: BankAccount = replayer.replay("acc1").await.unwrap().unwrap();
        assert_eq!(state.balance().value(), dec!(10));
    }

    #[tokio::test]
    async fn test_replay_as_of_ignores_later_events() {
        let (events, _, replayer) = replayer();
        let first = events
            .append(NewEvent::account("acc1", &created(dec!(100))).unwrap(), 1)
            .await
            .unwrap();
        let second = events
            .append(NewEvent::account("acc1", &deposit(dec!(50), "t1")).unwrap(), 2)
            .await
            .unwrap();
        events
            .append(NewEvent::account("acc1", &withdraw(dec!(20), "t2")).unwrap(), 3)
            .await
            .unwrap();

        let at_second: BankAccount = replayer
            .replay_as_of("acc1", second.timestamp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_second.balance().value(), dec!(150));

        let before: Option<BankAccount> = replayer
            .replay_as_of("acc1", first.timestamp - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(before.is_none());
    }

    #[derive(Debug, Clone)]
    enum Movement {
        Deposit(i64),
        Withdraw(i64),
    }

    fn movement() -> impl Strategy<Value = Movement> {
        prop_oneof![
            (1i64..10_000).prop_map(Movement::Deposit),
            (1i64..10_000).prop_map(Movement::Withdraw),
        ]
    }

    proptest! {
        #[test]
        fn prop_balance_is_initial_plus_deposits_minus_withdrawals(
            initial in 0i64..10_000,
            movements in proptest::collection::vec(movement(), 0..60),
        ) {
            let mut events = vec![stored(1, &created(Decimal::from(initial)))];
            let mut expected = Decimal::from(initial);

            for (i, m) in movements.iter().enumerate() {
                let tx = format!("t{}", i);
                let event = match m {
                    Movement::Deposit(cents) => {
                        let amount = Decimal::new(*cents, 2);
                        expected += amount;
                        deposit(amount, &tx)
                    }
                    Movement::Withdraw(cents) => {
                        let amount = Decimal::new(*cents, 2);
                        if amount > expected {
                            continue;
                        }
                        expected -= amount;
                        withdraw(amount, &tx)
                    }
                };
                let sequence = events.len() as i64 + 1;
                events.push(stored(sequence, &event));
            }

            let state = fold(BankAccount::empty("acc1"), &events).unwrap();
            prop_assert_eq!(state.balance().value(), expected);

            // Folding any prefix and then the rest equals folding everything
            let split = events.len() / 2;
            let head = fold(BankAccount::empty("acc1"), &events[..split.max(1)]).unwrap();
            let resumed = fold(head, &events[split.max(1)..]).unwrap();
            prop_assert_eq!(resumed, state);
        }
    }
}
