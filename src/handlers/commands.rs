//! Command definitions
//!
//! Commands represent intentions to change the system state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AccountStatus;

// =========================================================================
// CreateAccountCommand
// =========================================================================

/// Command to open a new bank account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub account_id: String,
    pub owner_name: String,
    /// ISO 4217 style code, normalised to upper case
    pub currency: String,
    pub initial_balance: Decimal,
}

impl CreateAccountCommand {
    pub fn new(account_id: impl Into<String>, owner_name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            owner_name: owner_name.into(),
            currency: currency.into(),
            initial_balance: Decimal::ZERO,
        }
    }

    pub fn with_initial_balance(mut self, initial_balance: Decimal) -> Self {
        self.initial_balance = initial_balance;
        self
    }
}

// =========================================================================
// DepositCommand / WithdrawCommand
// =========================================================================

/// Command to credit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub account_id: String,
    pub amount: Decimal,
    /// Client supplied deduplication key; generated when absent
    pub transaction_id: Option<String>,
    pub description: Option<String>,
}

impl DepositCommand {
    pub fn new(account_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
            transaction_id: None,
            description: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Command to debit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub account_id: String,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub description: Option<String>,
}

impl WithdrawCommand {
    pub fn new(account_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
            transaction_id: None,
            description: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// =========================================================================
// CloseAccountCommand
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAccountCommand {
    pub account_id: String,
}

impl CloseAccountCommand {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// Resolve the deduplication key of a money movement
pub(crate) fn transaction_id_or_new(transaction_id: Option<String>) -> String {
    transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Outcome categories of a mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Accepted,
    BadRequest,
    Conflict,
    NotFound,
}

/// Receipt of an accepted command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub account_id: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub sequence_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Balance right after the event
    pub balance: Decimal,
    pub status: AccountStatus,
}
