//! Domain Events
//!
//! Immutable facts recorded on a bank account stream.
//! The store keeps the event type and payload in separate columns, so events
//! are encoded as `(event_type, payload)` pairs rather than a tagged document.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate type written on every account event
pub const BANK_ACCOUNT: &str = "BankAccount";

/// Payload schema version written by this build
pub const SCHEMA_VERSION: i32 = 1;

/// Payload of `AccountCreated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOpened {
    pub owner_name: String,
    pub currency: String,
    #[serde(default)]
    pub initial_balance: Decimal,
}

/// Payload shared by `MoneyDeposited` and `MoneyWithdrawn`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyMoved {
    pub amount: Decimal,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Account-related events
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    AccountCreated(AccountOpened),
    MoneyDeposited(MoneyMoved),
    MoneyWithdrawn(MoneyMoved),
    AccountClosed,
}

/// Failure to turn a stored `(event_type, payload)` pair back into an event
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AccountEvent {
    /// Get the event type as stored in the log
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated(_) => "AccountCreated",
            AccountEvent::MoneyDeposited(_) => "MoneyDeposited",
            AccountEvent::MoneyWithdrawn(_) => "MoneyWithdrawn",
            AccountEvent::AccountClosed => "AccountClosed",
        }
    }

    /// Client transaction id carried by money movements
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            AccountEvent::MoneyDeposited(data) | AccountEvent::MoneyWithdrawn(data) => {
                Some(&data.transaction_id)
            }
            _ => None,
        }
    }

    /// Encode the payload column
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            AccountEvent::AccountCreated(data) => serde_json::to_value(data),
            AccountEvent::MoneyDeposited(data) | AccountEvent::MoneyWithdrawn(data) => {
                serde_json::to_value(data)
            }
            AccountEvent::AccountClosed => Ok(Value::Object(Default::default())),
        }
    }

    /// Decode a stored event
    pub fn decode(event_type: &str, payload: &Value) -> Result<Self, EventDecodeError> {
        let malformed = |source| EventDecodeError::Malformed {
            event_type: event_type.to_string(),
            source,
        };

        match event_type {
            "AccountCreated" => serde_json::from_value(payload.clone())
                .map(AccountEvent::AccountCreated)
                .map_err(malformed),
            "MoneyDeposited" => serde_json::from_value(payload.clone())
                .map(AccountEvent::MoneyDeposited)
                .map_err(malformed),
            "MoneyWithdrawn" => serde_json::from_value(payload.clone())
                .map(AccountEvent::MoneyWithdrawn)
                .map_err(malformed),
            "AccountClosed" => Ok(AccountEvent::AccountClosed),
            other => Err(EventDecodeError::UnknownType(other.to_string())),
        }
    }
}
