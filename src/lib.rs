//! financeLedger Library
//!
//! Event-sourced bank account ledger. Re-exports modules for integration
//! testing and the binaries.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod event_store;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod projection;
pub mod replay;
pub mod snapshot;

pub use config::{Config, LedgerConfig};
pub use domain::{AccountEvent, Amount, AmountError, Balance, DomainError};
pub use error::{AppError, AppResult};
pub use ledger::Ledger;
