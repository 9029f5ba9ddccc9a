//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::event_store::Event;
use crate::handlers::{
    CloseAccountCommand, CommandResult, CreateAccountCommand, DepositCommand, WithdrawCommand,
};
use crate::ledger::{BalanceAt, Ledger, TransactionPage, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use crate::projection::{AccountSummary, FailedStream, ProjectionStatus};

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub account_id: String,
    pub owner_name: String,
    pub currency: String,
    #[serde(default)]
    pub initial_balance: Decimal,
}

/// Body of deposit and withdraw requests
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    DEFAULT_PAGE
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub event_id: Uuid,
    pub event_type: String,
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub schema_version: i32,
    pub payload: serde_json::Value,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            sequence_number: event.sequence_number,
            timestamp: event.timestamp,
            schema_version: event.schema_version,
            payload: event.payload,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsListResponse {
    pub account_id: String,
    pub events: Vec<EventResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResponse {
    pub message: String,
    pub events_replayed: u64,
    pub accounts_rebuilt: usize,
    pub elapsed_ms: u64,
    pub failed_streams: Vec<FailedStream>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionLagResponse {
    pub name: String,
    pub last_processed_event_number_global: i64,
    pub lag: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionStatusResponse {
    pub total_events_in_store: i64,
    pub projections: Vec<ProjectionLagResponse>,
}

impl From<ProjectionStatus> for ProjectionStatusResponse {
    fn from(status: ProjectionStatus) -> Self {
        Self {
            total_events_in_store: status.total_events,
            projections: status
                .projections
                .into_iter()
                .map(|p| ProjectionLagResponse {
                    name: p.name,
                    last_processed_event_number_global: p.last_processed,
                    lag: p.lag,
                })
                .collect(),
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<Ledger> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/deposit", post(deposit))
        .route("/accounts/:account_id/withdraw", post(withdraw))
        .route("/accounts/:account_id/close", post(close_account))
        .route("/accounts/:account_id/transactions", get(list_transactions))
        .route("/accounts/:account_id/events", get(list_events))
        .route(
            "/accounts/:account_id/balance-at/:timestamp",
            get(balance_at),
        )
        .route("/projections/rebuild", post(rebuild_projections))
        .route("/projections/status", get(projection_status))
}

// =========================================================================
// Commands
// =========================================================================

/// POST /accounts
async fn create_account(
    State(ledger): State<Ledger>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CommandResult>), AppError> {
    let command = CreateAccountCommand::new(request.account_id, request.owner_name, request.currency)
        .with_initial_balance(request.initial_balance);

    let result = ledger.create_account(command).await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

/// POST /accounts/:account_id/deposit
async fn deposit(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
    Json(request): Json<MoneyRequest>,
) -> Result<(StatusCode, Json<CommandResult>), AppError> {
    let command = DepositCommand {
        account_id,
        amount: request.amount,
        transaction_id: request.transaction_id,
        description: request.description,
    };

    let result = ledger.deposit(command).await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

/// POST /accounts/:account_id/withdraw
async fn withdraw(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
    Json(request): Json<MoneyRequest>,
) -> Result<(StatusCode, Json<CommandResult>), AppError> {
    let command = WithdrawCommand {
        account_id,
        amount: request.amount,
        transaction_id: request.transaction_id,
        description: request.description,
    };

    let result = ledger.withdraw(command).await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

/// POST /accounts/:account_id/close
async fn close_account(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
) -> Result<(StatusCode, Json<CommandResult>), AppError> {
    let result = ledger
        .close_account(CloseAccountCommand::new(account_id))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

// =========================================================================
// Queries
// =========================================================================

/// GET /accounts/:account_id
async fn get_account(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountSummary>, AppError> {
    Ok(Json(ledger.get_account(&account_id).await?))
}

/// GET /accounts/:account_id/transactions?page=1&pageSize=10
async fn list_transactions(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionPage>, AppError> {
    let page = ledger
        .list_transactions(&account_id, query.page, query.page_size)
        .await?;

    Ok(Json(page))
}

/// GET /accounts/:account_id/events
async fn list_events(
    State(ledger): State<Ledger>,
    Path(account_id): Path<String>,
) -> Result<Json<EventsListResponse>, AppError> {
    let events = ledger.list_events(&account_id).await?;

    Ok(Json(EventsListResponse {
        account_id,
        events: events.into_iter().map(EventResponse::from).collect(),
    }))
}

/// GET /accounts/:account_id/balance-at/:timestamp (RFC 3339)
async fn balance_at(
    State(ledger): State<Ledger>,
    Path((account_id, timestamp)): Path<(String, String)>,
) -> Result<Json<BalanceAt>, AppError> {
    let at = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| AppError::Validation(format!("invalid timestamp '{}': {}", timestamp, e)))?
        .with_timezone(&Utc);

    Ok(Json(ledger.balance_at(&account_id, at).await?))
}

// =========================================================================
// Projections
// =========================================================================

/// POST /projections/rebuild
async fn rebuild_projections(
    State(ledger): State<Ledger>,
) -> Result<(StatusCode, Json<RebuildResponse>), AppError> {
    let report = ledger.rebuild_projections().await?;
    let message = if report.failed_streams.is_empty() {
        "Projections rebuilt from the event store".to_string()
    } else {
        format!(
            "Projections rebuilt; {} stream(s) halted",
            report.failed_streams.len()
        )
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(RebuildResponse {
            message,
            events_replayed: report.events_replayed,
            accounts_rebuilt: report.accounts_rebuilt,
            elapsed_ms: report.elapsed_ms,
            failed_streams: report.failed_streams,
        }),
    ))
}

/// GET /projections/status
async fn projection_status(
    State(ledger): State<Ledger>,
) -> Result<Json<ProjectionStatusResponse>, AppError> {
    let status = ledger.projection_status().await?;

    Ok(Json(status.into()))
}
