//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.
//! An aggregate's state is nothing more than the fold of its event stream;
//! `apply` is the transition function and rejects anything a valid stream
//! could never contain.

pub mod account;

use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::EventDecodeError;
use crate::event_store::Event;

pub use account::{AccountStatus, BankAccount};

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized + Serialize + DeserializeOwned {
    /// The type of events this aggregate handles
    type Event;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// State of a stream before its first event
    fn empty(id: &str) -> Self;

    fn id(&self) -> &str;

    /// Sequence number of the last applied event (0 before genesis)
    fn version(&self) -> i64;

    /// Decode a stored event into this aggregate's event type
    fn decode(event: &Event) -> Result<Self::Event, FoldError>;

    /// Apply one event, advancing the version by one
    fn apply(self, event: Self::Event) -> Result<Self, FoldError>;
}

/// A stream that no valid history could have produced
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FoldError {
    #[error("unknown event type {0}")]
    UnknownEventType(String),

    #[error("malformed payload for {event_type}: {reason}")]
    MalformedPayload { event_type: String, reason: String },

    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: i64, found: i64 },

    #[error("{0} applied before AccountCreated")]
    NotCreated(String),

    #[error("AccountCreated applied to an existing account")]
    AlreadyCreated,

    #[error("{0} applied after AccountClosed")]
    AfterClose(String),

    #[error("invalid amount {0}")]
    InvalidAmount(Decimal),

    #[error("withdrawal of {amount} exceeds balance {balance}")]
    Overdrawn { amount: Decimal, balance: Decimal },

    #[error("account closed with non-zero balance {0}")]
    ClosedWithBalance(Decimal),
}

impl From<EventDecodeError> for FoldError {
    fn from(err: EventDecodeError) -> Self {
        match err {
            EventDecodeError::UnknownType(event_type) => FoldError::UnknownEventType(event_type),
            EventDecodeError::Malformed { event_type, source } => FoldError::MalformedPayload {
                event_type,
                reason: source.to_string(),
            },
        }
    }
}
