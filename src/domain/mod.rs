//! Domain module
//!
//! Money primitives, account events and business rule errors.

pub mod amount;
pub mod error;
pub mod events;

pub use amount::{Amount, AmountError, Balance};
pub use error::DomainError;
pub use events::{
    AccountEvent, AccountOpened, EventDecodeError, MoneyMoved, BANK_ACCOUNT, SCHEMA_VERSION,
};
