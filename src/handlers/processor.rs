//! Command Processor
//!
//! Replays the account, decides the next event against that state and appends
//! it with optimistic concurrency. A lost race is retried from a fresh replay
//! a bounded number of times. Projection and snapshot maintenance run after
//! the append and never fail an accepted command.

use std::sync::Arc;

use crate::aggregate::{Aggregate, BankAccount};
use crate::config::LedgerConfig;
use crate::domain::{AccountEvent, Amount, DomainError};
use crate::error::{AppError, AppResult};
use crate::event_store::{Event, EventStore, NewEvent};
use crate::projection::ProjectionEngine;
use crate::replay::AggregateReplayer;
use crate::snapshot::SnapshotManager;

use super::commands::transaction_id_or_new;
use super::{
    CloseAccountCommand, CommandResult, CreateAccountCommand, DepositCommand, WithdrawCommand,
};

const MAX_ID_LENGTH: usize = 100;

#[derive(Clone)]
pub struct CommandProcessor {
    events: Arc<dyn EventStore>,
    replayer: AggregateReplayer,
    snapshots: SnapshotManager,
    projections: ProjectionEngine,
    config: LedgerConfig,
}

impl CommandProcessor {
    pub fn new(
        events: Arc<dyn EventStore>,
        replayer: AggregateReplayer,
        snapshots: SnapshotManager,
        projections: ProjectionEngine,
        config: LedgerConfig,
    ) -> Self {
        Self {
            events,
            replayer,
            snapshots,
            projections,
            config,
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn create_account(&self, command: CreateAccountCommand) -> AppResult<CommandResult> {
        let account_id = validate_id("account id", &command.account_id)?;
        let owner_name = command.owner_name.trim().to_string();
        if owner_name.is_empty() {
            return Err(AppError::Validation("owner name must not be empty".to_string()));
        }
        let currency = normalize_currency(&command.currency)?;
        let initial_balance = command.initial_balance;

        self.execute(&account_id, None, |account| {
            account.open(owner_name.clone(), currency.clone(), initial_balance)
        })
        .await
    }

    pub async fn deposit(&self, command: DepositCommand) -> AppResult<CommandResult> {
        let account_id = validate_id("account id", &command.account_id)?;
        let amount = parse_amount(command.amount)?;
        let transaction_id = validate_id(
            "transaction id",
            &transaction_id_or_new(command.transaction_id),
        )?;
        let description = command.description;

        self.execute(&account_id, Some(&transaction_id), |account| {
            account.deposit(&amount, transaction_id.clone(), description.clone())
        })
        .await
    }

    pub async fn withdraw(&self, command: WithdrawCommand) -> AppResult<CommandResult> {
        let account_id = validate_id("account id", &command.account_id)?;
        let amount = parse_amount(command.amount)?;
        let transaction_id = validate_id(
            "transaction id",
            &transaction_id_or_new(command.transaction_id),
        )?;
        let description = command.description;

        self.execute(&account_id, Some(&transaction_id), |account| {
            account.withdraw(&amount, transaction_id.clone(), description.clone())
        })
        .await
    }

    pub async fn close_account(&self, command: CloseAccountCommand) -> AppResult<CommandResult> {
        let account_id = validate_id("account id", &command.account_id)?;

        self.execute(&account_id, None, |account| account.close()).await
    }

    // =========================================================================
    // Replay, decide, append
    // =========================================================================

    async fn execute<F>(
        &self,
        account_id: &str,
        transaction_id: Option<&str>,
        decide: F,
    ) -> AppResult<CommandResult>
    where
        F: Fn(&BankAccount) -> Result<AccountEvent, DomainError> + Send + Sync,
    {
        if let Some(transaction_id) = transaction_id {
            if self.events.find_transaction(transaction_id).await?.is_some() {
                return Err(AppError::DuplicateTransaction(transaction_id.to_string()));
            }
        }

        let max_attempts = self.config.max_append_attempts.max(1);

        for attempt in 1..=max_attempts {
            let account = self
                .replayer
                .replay::<BankAccount>(account_id)
                .await?
                .unwrap_or_else(|| BankAccount::empty(account_id));

            let event = decide(&account)?;
            let expected_sequence = account.version() + 1;

            match self
                .events
                .append(NewEvent::account(account_id, &event)?, expected_sequence)
                .await
            {
                Ok(stored) => {
                    let account = account
                        .apply(event)
                        .map_err(|e| AppError::InvariantViolation(e.to_string()))?;
                    self.after_append(&stored).await;

                    tracing::info!(
                        account_id = %account_id,
                        event_type = %stored.event_type,
                        sequence_number = stored.sequence_number,
                        attempt,
                        "Command accepted"
                    );

                    return Ok(CommandResult {
                        account_id: account_id.to_string(),
                        event_id: stored.event_id,
                        event_type: stored.event_type,
                        sequence_number: stored.sequence_number,
                        transaction_id: transaction_id.map(str::to_string),
                        balance: account.balance().value(),
                        status: account.status(),
                    });
                }
                Err(e) if e.is_concurrency_conflict() => {
                    tracing::warn!(
                        account_id = %account_id,
                        attempt,
                        max_attempts,
                        "Append lost a concurrent race"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::ConcurrencyConflict(account_id.to_string()))
    }

    /// Keep read models and snapshots in step with an appended event.
    /// Failures are repaired by the maintenance scheduler.
    async fn after_append(&self, event: &Event) {
        if let Err(e) = self.projections.apply(event).await {
            tracing::error!(
                aggregate_id = %event.aggregate_id,
                sequence_number = event.sequence_number,
                error = %e,
                "Failed to update projections"
            );
        }

        if let Err(e) = self
            .snapshots
            .maybe_snapshot::<BankAccount>(&event.aggregate_id, event.sequence_number)
            .await
        {
            tracing::error!(
                aggregate_id = %event.aggregate_id,
                sequence_number = event.sequence_number,
                error = %e,
                "Failed to take snapshot"
            );
        }
    }
}

// =========================================================================
// Input validation
// =========================================================================

fn validate_id(what: &str, raw: &str) -> AppResult<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", what)));
    }
    if id.chars().count() > MAX_ID_LENGTH {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            what, MAX_ID_LENGTH
        )));
    }
    Ok(id.to_string())
}

fn normalize_currency(raw: &str) -> AppResult<String> {
    let code = raw.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(format!(
            "currency must be three letters, got '{}'",
            raw
        )));
    }
    Ok(code.to_ascii_uppercase())
}

fn parse_amount(value: rust_decimal::Decimal) -> AppResult<Amount> {
    Amount::new(value).map_err(|e| AppError::Domain(DomainError::InvalidAmount(e.to_string())))
}
