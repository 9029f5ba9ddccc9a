//! Bank Account Aggregate
//!
//! Decides commands against the current state (returning the event to append)
//! and folds stored events back into state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::{
    AccountEvent, AccountOpened, Amount, Balance, DomainError, MoneyMoved, BANK_ACCOUNT,
};
use crate::event_store::Event;

use super::{Aggregate, FoldError};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Open,
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Open => write!(f, "OPEN"),
            AccountStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(AccountStatus::Open),
            "CLOSED" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status {}", other)),
        }
    }
}

/// Bank Account Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    account_id: String,
    owner_name: String,
    currency: String,
    balance: Balance,
    status: AccountStatus,
    /// Sequence number of the last applied event
    version: i64,
}

impl BankAccount {
    // =========================================================================
    // Command decisions
    // =========================================================================

    /// Decide the opening event for an empty stream
    pub fn open(
        &self,
        owner_name: String,
        currency: String,
        initial_balance: Decimal,
    ) -> Result<AccountEvent, DomainError> {
        if self.is_created() {
            return Err(DomainError::AccountAlreadyExists(self.account_id.clone()));
        }

        Balance::new(initial_balance)
            .map_err(|e| DomainError::InvalidAmount(format!("initial balance: {}", e)))?;

        Ok(AccountEvent::AccountCreated(AccountOpened {
            owner_name,
            currency,
            initial_balance,
        }))
    }

    pub fn deposit(
        &self,
        amount: &Amount,
        transaction_id: String,
        description: Option<String>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_open()?;

        self.balance
            .credit(amount)
            .map_err(|e| DomainError::InvalidAmount(e.to_string()))?;

        Ok(AccountEvent::MoneyDeposited(MoneyMoved {
            amount: amount.value(),
            transaction_id,
            description,
        }))
    }

    pub fn withdraw(
        &self,
        amount: &Amount,
        transaction_id: String,
        description: Option<String>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_open()?;

        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_funds(
                amount.value(),
                self.balance.value(),
            ));
        }

        Ok(AccountEvent::MoneyWithdrawn(MoneyMoved {
            amount: amount.value(),
            transaction_id,
            description,
        }))
    }

    /// Closing is decided against replayed state, never a cached read model
    pub fn close(&self) -> Result<AccountEvent, DomainError> {
        self.ensure_open()?;

        if !self.balance.is_zero() {
            return Err(DomainError::BalanceNotZero {
                balance: self.balance.value(),
            });
        }

        Ok(AccountEvent::AccountClosed)
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.is_created() {
            return Err(DomainError::AccountNotFound(self.account_id.clone()));
        }
        if self.status == AccountStatus::Closed {
            return Err(DomainError::AccountClosed(self.account_id.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.version > 0
    }

    pub fn is_closed(&self) -> bool {
        self.status == AccountStatus::Closed
    }

    /// Guard used by the fold for every event except `AccountCreated`
    fn require_open(&self, event_type: &str) -> Result<(), FoldError> {
        if !self.is_created() {
            return Err(FoldError::NotCreated(event_type.to_string()));
        }
        if self.status == AccountStatus::Closed {
            return Err(FoldError::AfterClose(event_type.to_string()));
        }
        Ok(())
    }
}

// =========================================================================
// Transition function
// =========================================================================

impl Aggregate for BankAccount {
    type Event = AccountEvent;

    fn aggregate_type() -> &'static str {
        BANK_ACCOUNT
    }

    fn empty(id: &str) -> Self {
        Self {
            account_id: id.to_string(),
            owner_name: String::new(),
            currency: String::new(),
            balance: Balance::zero(),
            status: AccountStatus::Open,
            version: 0,
        }
    }

    fn id(&self) -> &str {
        &self.account_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn decode(event: &Event) -> Result<AccountEvent, FoldError> {
        Ok(AccountEvent::decode(&event.event_type, &event.payload)?)
    }

    fn apply(mut self, event: AccountEvent) -> Result<Self, FoldError> {
        let event_type = event.event_type();

        match event {
            AccountEvent::AccountCreated(data) => {
                if self.is_created() {
                    return Err(FoldError::AlreadyCreated);
                }
                self.balance = Balance::new(data.initial_balance)
                    .map_err(|_| FoldError::InvalidAmount(data.initial_balance))?;
                self.owner_name = data.owner_name;
                self.currency = data.currency;
                self.status = AccountStatus::Open;
            }

            AccountEvent::MoneyDeposited(data) => {
                self.require_open(event_type)?;
                let amount =
                    Amount::new(data.amount).map_err(|_| FoldError::InvalidAmount(data.amount))?;
                self.balance = self
                    .balance
                    .credit(&amount)
                    .map_err(|_| FoldError::InvalidAmount(data.amount))?;
            }

            AccountEvent::MoneyWithdrawn(data) => {
                self.require_open(event_type)?;
                let amount =
                    Amount::new(data.amount).map_err(|_| FoldError::InvalidAmount(data.amount))?;
                if !self.balance.is_sufficient_for(&amount) {
                    return Err(FoldError::Overdrawn {
                        amount: data.amount,
                        balance: self.balance.value(),
                    });
                }
                self.balance = self
                    .balance
                    .debit(&amount)
                    .map_err(|_| FoldError::InvalidAmount(data.amount))?;
            }

            AccountEvent::AccountClosed => {
                self.require_open(event_type)?;
                if !self.balance.is_zero() {
                    return Err(FoldError::ClosedWithBalance(self.balance.value()));
                }
                self.status = AccountStatus::Closed;
            }
        }

        self.version += 1;
        Ok(self)
    }
}
