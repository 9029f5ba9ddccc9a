//! Domain Error Types
//!
//! Business rule violations raised while deciding a command against replayed
//! account state. They never depend on storage or transport.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, or outside representable bounds
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    /// Closing requires a zero balance
    #[error("Balance is not zero: {balance}")]
    BalanceNotZero { balance: Decimal },

    #[error("Account is closed: {0}")]
    AccountClosed(String),
}

impl DomainError {
    pub fn insufficient_funds(requested: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            requested,
            available,
        }
    }

    /// Check if the request itself was malformed
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidAmount(_))
    }

    /// Check if the request conflicts with the current account state
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::AccountAlreadyExists(_)
                | Self::InsufficientFunds { .. }
                | Self::BalanceNotZero { .. }
                | Self::AccountClosed(_)
        )
    }
}
