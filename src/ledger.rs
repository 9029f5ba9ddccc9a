//! Ledger facade
//!
//! Wires the event store, replayer, snapshot manager, projection engine and
//! command processor over one storage backend and exposes the operation
//! surface used by the HTTP layer and the load-test binary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::aggregate::{AccountStatus, Aggregate, BankAccount};
use crate::config::LedgerConfig;
use crate::domain::DomainError;
use crate::error::{AppError, AppResult};
use crate::event_store::{Event, EventStore, InMemoryEventStore, PgEventStore};
use crate::handlers::{
    CloseAccountCommand, CommandProcessor, CommandResult, CreateAccountCommand, DepositCommand,
    WithdrawCommand,
};
use crate::projection::{
    AccountSummary, InMemoryProjectionStore, PgProjectionStore, ProjectionEngine,
    ProjectionStatus, ProjectionStore, RebuildHandle, RebuildReport, TransactionHistoryEntry,
};
use crate::replay::AggregateReplayer;
use crate::snapshot::{
    EveryNEvents, InMemorySnapshotStore, PgSnapshotStore, SnapshotManager, SnapshotStore,
};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of an account's transaction history, newest first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub current_page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_count: i64,
    pub items: Vec<TransactionHistoryEntry>,
}

/// Account state as of a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAt {
    pub account_id: String,
    pub as_of: DateTime<Utc>,
    pub balance: Decimal,
    /// Sequence number of the last event at or before `as_of` (0 before creation)
    pub version: i64,
    /// `None` when the account did not exist yet
    pub status: Option<AccountStatus>,
}

#[derive(Clone)]
pub struct Ledger {
    events: Arc<dyn EventStore>,
    replayer: AggregateReplayer,
    snapshots: SnapshotManager,
    projections: ProjectionEngine,
    commands: CommandProcessor,
}

impl Ledger {
    pub fn postgres(pool: PgPool, config: LedgerConfig) -> Self {
        Self::with_stores(
            Arc::new(PgEventStore::new(pool.clone())),
            Arc::new(PgSnapshotStore::new(pool.clone())),
            Arc::new(PgProjectionStore::new(pool)),
            config,
        )
    }

    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::with_stores(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryProjectionStore::new()),
            config,
        )
    }

    pub fn with_stores(
        events: Arc<dyn EventStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        projection_store: Arc<dyn ProjectionStore>,
        config: LedgerConfig,
    ) -> Self {
        let policy = Arc::new(EveryNEvents::new(config.snapshot_interval));
        let replayer = AggregateReplayer::new(events.clone(), snapshot_store.clone());
        let snapshots = SnapshotManager::new(events.clone(), snapshot_store, policy);
        let projections = ProjectionEngine::new(events.clone(), projection_store);
        let commands = CommandProcessor::new(
            events.clone(),
            replayer.clone(),
            snapshots.clone(),
            projections.clone(),
            config,
        );

        Self {
            events,
            replayer,
            snapshots,
            projections,
            commands,
        }
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.events.clone()
    }

    pub fn projection_engine(&self) -> &ProjectionEngine {
        &self.projections
    }

    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn create_account(&self, command: CreateAccountCommand) -> AppResult<CommandResult> {
        self.commands.create_account(command).await
    }

    pub async fn deposit(&self, command: DepositCommand) -> AppResult<CommandResult> {
        self.commands.deposit(command).await
    }

    pub async fn withdraw(&self, command: WithdrawCommand) -> AppResult<CommandResult> {
        self.commands.withdraw(command).await
    }

    pub async fn close_account(&self, command: CloseAccountCommand) -> AppResult<CommandResult> {
        self.commands.close_account(command).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Account summary from the read model. A summary missing for an account
    /// that has events is caught up from the log first.
    pub async fn get_account(&self, account_id: &str) -> AppResult<AccountSummary> {
        if let Some(summary) = self.projections.summary(account_id).await? {
            return Ok(summary);
        }

        self.ensure_exists(account_id).await?;
        self.projections.catch_up(account_id).await?;

        self.projections
            .summary(account_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("no summary for {} after catch-up", account_id)))
    }

    /// Account state replayed from the event log
    pub async fn account_state(&self, account_id: &str) -> AppResult<BankAccount> {
        self.replayer
            .replay::<BankAccount>(account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_id.to_string()).into())
    }

    pub async fn list_transactions(
        &self,
        account_id: &str,
        page: i64,
        page_size: i64,
    ) -> AppResult<TransactionPage> {
        if page < 1 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::Validation(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.projections.summary(account_id).await?.is_none() {
            self.ensure_exists(account_id).await?;
            self.projections.catch_up(account_id).await?;
        }

        let total_count = self.projections.transaction_count(account_id).await?;
        let offset = (page - 1).saturating_mul(page_size);
        let items = self
            .projections
            .transactions(account_id, page_size, offset)
            .await?;

        Ok(TransactionPage {
            current_page: page,
            page_size,
            total_pages: (total_count + page_size - 1) / page_size,
            total_count,
            items,
        })
    }

    /// Raw event stream of one account, ascending
    pub async fn list_events(&self, account_id: &str) -> AppResult<Vec<Event>> {
        let events = self.events.load(account_id, 0).await?;
        if events.is_empty() {
            return Err(DomainError::AccountNotFound(account_id.to_string()).into());
        }
        Ok(events)
    }

    /// Time-travel query over events with `timestamp <= at`
    pub async fn balance_at(&self, account_id: &str, at: DateTime<Utc>) -> AppResult<BalanceAt> {
        self.ensure_exists(account_id).await?;

        let state = self.replayer.replay_as_of::<BankAccount>(account_id, at).await?;

        Ok(match state {
            Some(account) => BalanceAt {
                account_id: account_id.to_string(),
                as_of: at,
                balance: account.balance().value(),
                version: account.version(),
                status: Some(account.status()),
            },
            None => BalanceAt {
                account_id: account_id.to_string(),
                as_of: at,
                balance: Decimal::ZERO,
                version: 0,
                status: None,
            },
        })
    }

    // =========================================================================
    // Projection maintenance
    // =========================================================================

    pub async fn rebuild_projections(&self) -> AppResult<RebuildReport> {
        Ok(self.projections.rebuild().await?)
    }

    pub fn spawn_rebuild(&self) -> RebuildHandle {
        RebuildHandle::spawn(self.projections.clone())
    }

    pub async fn projection_status(&self) -> AppResult<ProjectionStatus> {
        Ok(self.projections.status().await?)
    }

    async fn ensure_exists(&self, account_id: &str) -> AppResult<()> {
        if self.events.current_sequence(account_id).await? == 0 {
            return Err(DomainError::AccountNotFound(account_id.to_string()).into());
        }
        Ok(())
    }
}
