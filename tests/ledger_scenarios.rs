//! Ledger scenarios over the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use finance_ledger::aggregate::{AccountStatus, Aggregate, BankAccount};
use finance_ledger::domain::DomainError;
use finance_ledger::event_store::{EventStore, InMemoryEventStore, NewEvent};
use finance_ledger::handlers::{
    CloseAccountCommand, CommandOutcome, CreateAccountCommand, DepositCommand, WithdrawCommand,
};
use finance_ledger::projection::{AccountSummary, InMemoryProjectionStore};
use finance_ledger::replay::fold;
use finance_ledger::snapshot::{InMemorySnapshotStore, SnapshotStore};
use finance_ledger::{AppError, Ledger, LedgerConfig};

mod common;

async fn open_alice(ledger: &Ledger) {
    ledger
        .create_account(
            CreateAccountCommand::new("acc1", "Alice", "USD").with_initial_balance(dec!(100)),
        )
        .await
        .expect("create acc1");
}

// =========================================================================
// Account lifecycle
// =========================================================================

#[tokio::test]
async fn test_create_account_is_visible() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;

    let summary = ledger.get_account("acc1").await.unwrap();
    assert_eq!(summary.balance, dec!(100));
    assert_eq!(summary.status, AccountStatus::Open);
    assert_eq!(summary.version, 1);
    assert_eq!(summary.currency, "USD");
}

#[tokio::test]
async fn test_duplicate_deposit_leaves_balance_unchanged() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;

    let receipt = ledger
        .deposit(DepositCommand::new("acc1", dec!(50)).with_transaction_id("t1"))
        .await
        .unwrap();
    assert_eq!(receipt.balance, dec!(150));

    let err = ledger
        .deposit(DepositCommand::new("acc1", dec!(50)).with_transaction_id("t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateTransaction(_)));

    assert_eq!(ledger.get_account("acc1").await.unwrap().balance, dec!(150));
    assert_eq!(ledger.account_state("acc1").await.unwrap().balance().value(), dec!(150));
}

#[tokio::test]
async fn test_overdraft_appends_nothing() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;
    ledger
        .deposit(DepositCommand::new("acc1", dec!(50)).with_transaction_id("t1"))
        .await
        .unwrap();

    let err = ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::InsufficientFunds { .. })));
    assert_eq!(err.outcome(), Some(CommandOutcome::Conflict));

    assert_eq!(ledger.list_events("acc1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_withdraw_all_then_close() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;
    ledger
        .deposit(DepositCommand::new("acc1", dec!(50)).with_transaction_id("t1"))
        .await
        .unwrap();

    ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(150)))
        .await
        .unwrap();
    ledger
        .close_account(CloseAccountCommand::new("acc1"))
        .await
        .unwrap();

    let summary = ledger.get_account("acc1").await.unwrap();
    assert_eq!(summary.status, AccountStatus::Closed);
    assert_eq!(summary.balance, dec!(0));

    let err = ledger
        .deposit(DepositCommand::new("acc1", dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::AccountClosed(_))));

    let err = ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::AccountClosed(_))));
}

#[tokio::test]
async fn test_unknown_account_is_not_found_everywhere() {
    let ledger = common::memory_ledger();

    assert!(ledger.get_account("ghost").await.unwrap_err().is_not_found());
    assert!(ledger.account_state("ghost").await.unwrap_err().is_not_found());
    assert!(ledger.list_events("ghost").await.unwrap_err().is_not_found());
    assert!(ledger
        .list_transactions("ghost", 1, 10)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(ledger.balance_at("ghost", Utc::now()).await.unwrap_err().is_not_found());
    assert!(ledger
        .close_account(CloseAccountCommand::new("ghost"))
        .await
        .unwrap_err()
        .is_not_found());
}

// =========================================================================
// Snapshots
// =========================================================================

#[tokio::test]
async fn test_snapshot_after_fiftieth_event_matches_replay() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;
    for i in 0..49 {
        ledger
            .deposit(DepositCommand::new("acc1", dec!(1)).with_transaction_id(format!("d{}", i)))
            .await
            .unwrap();
    }

    let snapshot = ledger
        .snapshot_manager()
        .latest("acc1")
        .await
        .unwrap()
        .expect("snapshot after 50 events");
    assert_eq!(snapshot.last_sequence_number, 50);

    let snapshot_state: BankAccount = serde_json::from_value(snapshot.state).unwrap();
    let events = ledger.list_events("acc1").await.unwrap();
    let from_genesis = fold(BankAccount::empty("acc1"), &events).unwrap();

    assert_eq!(snapshot_state, from_genesis);
    assert_eq!(from_genesis.balance().value(), dec!(149));

    // Snapshot plus tail agrees with genesis after more events
    ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(9)))
        .await
        .unwrap();
    let replayed = ledger.account_state("acc1").await.unwrap();
    let events = ledger.list_events("acc1").await.unwrap();
    assert_eq!(replayed, fold(BankAccount::empty("acc1"), &events).unwrap());
    assert_eq!(replayed.version(), 51);
}

#[tokio::test]
async fn test_deleting_snapshots_changes_no_query() {
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let ledger = Ledger::with_stores(
        Arc::new(InMemoryEventStore::new()),
        snapshots.clone(),
        Arc::new(InMemoryProjectionStore::new()),
        LedgerConfig {
            snapshot_interval: 2,
            ..LedgerConfig::default()
        },
    );

    open_alice(&ledger).await;
    ledger
        .deposit(DepositCommand::new("acc1", dec!(20)).with_transaction_id("t1"))
        .await
        .unwrap();
    ledger
        .deposit(DepositCommand::new("acc1", dec!(30)).with_transaction_id("t2"))
        .await
        .unwrap();
    let checkpoint = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;
    ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(15)).with_transaction_id("w1"))
        .await
        .unwrap();
    ledger
        .deposit(DepositCommand::new("acc1", dec!(1)).with_transaction_id("t3"))
        .await
        .unwrap();

    let snapshot = snapshots.get("acc1").await.unwrap().unwrap();
    assert_eq!(snapshot.last_sequence_number, 4);

    let state = ledger.account_state("acc1").await.unwrap();
    let summary = ledger.get_account("acc1").await.unwrap();
    let then = ledger.balance_at("acc1", checkpoint).await.unwrap();
    let history = ledger.list_transactions("acc1", 1, 10).await.unwrap();

    snapshots.delete("acc1").await.unwrap();
    assert!(ledger.snapshot_manager().latest("acc1").await.unwrap().is_none());

    assert_eq!(ledger.account_state("acc1").await.unwrap(), state);
    assert_eq!(ledger.get_account("acc1").await.unwrap(), summary);
    assert_eq!(ledger.balance_at("acc1", checkpoint).await.unwrap(), then);
    assert_eq!(ledger.list_transactions("acc1", 1, 10).await.unwrap(), history);

    assert_eq!(state.balance().value(), dec!(136));
    assert_eq!(then.balance, dec!(150));
}

// =========================================================================
// Projections
// =========================================================================

#[tokio::test]
async fn test_rebuild_repairs_corrupted_summaries() {
    let projections = Arc::new(InMemoryProjectionStore::new());
    let ledger = Ledger::with_stores(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemorySnapshotStore::new()),
        projections.clone(),
        LedgerConfig::default(),
    );

    open_alice(&ledger).await;
    ledger
        .create_account(CreateAccountCommand::new("acc2", "Bob", "EUR"))
        .await
        .unwrap();
    ledger
        .deposit(DepositCommand::new("acc2", dec!(25)).with_transaction_id("b1"))
        .await
        .unwrap();

    let before = ledger.projection_engine().summaries().await.unwrap();

    projections
        .replace_summary(AccountSummary {
            account_id: "acc1".to_string(),
            owner_name: "Eve".to_string(),
            currency: "XXX".to_string(),
            balance: dec!(-1),
            status: AccountStatus::Closed,
            version: 1,
        })
        .await;
    assert_ne!(ledger.projection_engine().summaries().await.unwrap(), before);

    let report = ledger.rebuild_projections().await.unwrap();
    assert_eq!(report.events_replayed, 3);
    assert_eq!(report.accounts_rebuilt, 2);
    assert_eq!(ledger.projection_engine().summaries().await.unwrap(), before);

    // Idempotent
    ledger.rebuild_projections().await.unwrap();
    assert_eq!(ledger.projection_engine().summaries().await.unwrap(), before);

    let status = ledger.projection_status().await.unwrap();
    assert_eq!(status.total_events, 3);
    assert!(status.projections.iter().all(|p| p.last_processed == 3 && p.lag == 0));
}

#[tokio::test]
async fn test_malformed_stream_does_not_empty_other_accounts() {
    let ledger = common::memory_ledger();

    ledger
        .event_store()
        .append(
            NewEvent {
                aggregate_id: "aaa".to_string(),
                aggregate_type: "BankAccount".to_string(),
                event_type: "Frozen".to_string(),
                payload: serde_json::json!({}),
                schema_version: 1,
                transaction_id: None,
            },
            1,
        )
        .await
        .unwrap();

    ledger
        .create_account(CreateAccountCommand::new("bbb", "Bob", "USD"))
        .await
        .unwrap();
    ledger
        .deposit(DepositCommand::new("bbb", dec!(7)).with_transaction_id("b1"))
        .await
        .unwrap();

    let report = ledger.rebuild_projections().await.unwrap();
    assert_eq!(report.accounts_rebuilt, 1);
    assert_eq!(report.failed_streams.len(), 1);
    assert_eq!(report.failed_streams[0].aggregate_id, "aaa");

    let page = ledger.list_transactions("bbb", 1, 10).await.unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(ledger.get_account("bbb").await.unwrap().balance, dec!(7));

    let err = ledger.list_transactions("aaa", 1, 10).await.unwrap_err();
    assert!(matches!(err, AppError::InvariantViolation(_)));
}

#[tokio::test]
async fn test_background_rebuild_reports_progress() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;
    ledger
        .deposit(DepositCommand::new("acc1", dec!(5)))
        .await
        .unwrap();

    let handle = ledger.spawn_rebuild();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.events_replayed, 2);
    assert_eq!(ledger.get_account("acc1").await.unwrap().balance, dec!(105));
}

#[tokio::test]
async fn test_transactions_are_paged_newest_first() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;
    for i in 1..=5 {
        ledger
            .deposit(
                DepositCommand::new("acc1", dec!(1))
                    .with_transaction_id(format!("t{}", i))
                    .with_description(format!("deposit {}", i)),
            )
            .await
            .unwrap();
    }
    ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(2)).with_transaction_id("w1"))
        .await
        .unwrap();

    let page = ledger.list_transactions("acc1", 1, 4).await.unwrap();
    assert_eq!(page.total_count, 6);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.current_page, 1);
    let ids: Vec<_> = page.items.iter().map(|e| e.transaction_id.as_str()).collect();
    assert_eq!(ids, vec!["w1", "t5", "t4", "t3"]);

    let page = ledger.list_transactions("acc1", 2, 4).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[1].transaction_id, "t1");

    let page = ledger.list_transactions("acc1", 3, 4).await.unwrap();
    assert!(page.items.is_empty());

    for (page, size) in [(0, 10), (1, 0), (1, 101)] {
        let err = ledger.list_transactions("acc1", page, size).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

// =========================================================================
// Time travel
// =========================================================================

#[tokio::test]
async fn test_balance_at_only_sees_earlier_events() {
    let ledger = common::memory_ledger();

    let before_creation = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    open_alice(&ledger).await;
    ledger
        .deposit(DepositCommand::new("acc1", dec!(50)))
        .await
        .unwrap();

    let checkpoint = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    ledger
        .withdraw(WithdrawCommand::new("acc1", dec!(30)))
        .await
        .unwrap();

    let then = ledger.balance_at("acc1", checkpoint).await.unwrap();
    assert_eq!(then.balance, dec!(150));
    assert_eq!(then.version, 2);
    assert_eq!(then.status, Some(AccountStatus::Open));

    let now = ledger.balance_at("acc1", Utc::now()).await.unwrap();
    assert_eq!(now.balance, dec!(120));
    assert_eq!(now.version, 3);

    let earlier = ledger.balance_at("acc1", before_creation).await.unwrap();
    assert_eq!(earlier.balance, dec!(0));
    assert_eq!(earlier.version, 0);
    assert_eq!(earlier.status, None);
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test]
async fn test_concurrent_duplicate_transaction_commits_once() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .deposit(DepositCommand::new("acc1", dec!(10)).with_transaction_id("same"))
                .await
        })
    };
    let second = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .deposit(DepositCommand::new("acc1", dec!(10)).with_transaction_id("same"))
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::DuplicateTransaction(_))))
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(ledger.event_store().current_sequence("acc1").await.unwrap(), 2);
    assert_eq!(ledger.get_account("acc1").await.unwrap().balance, dec!(110));
}

#[tokio::test]
async fn test_balance_equals_initial_plus_deposits_minus_withdrawals() {
    let ledger = common::memory_ledger();
    open_alice(&ledger).await;

    let deposits = [dec!(10.5), dec!(0.25), dec!(99)];
    let withdrawals = [dec!(20), dec!(0.75)];
    for amount in deposits {
        ledger.deposit(DepositCommand::new("acc1", amount)).await.unwrap();
    }
    for amount in withdrawals {
        ledger.withdraw(WithdrawCommand::new("acc1", amount)).await.unwrap();
    }

    let expected = dec!(100) + deposits.iter().sum::<rust_decimal::Decimal>()
        - withdrawals.iter().sum::<rust_decimal::Decimal>();

    assert_eq!(ledger.account_state("acc1").await.unwrap().balance().value(), expected);
    assert_eq!(ledger.get_account("acc1").await.unwrap().balance, expected);
}
