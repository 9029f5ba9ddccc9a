//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::ledger::Ledger;

pub use routes::create_router;

/// Build the application router
pub fn build_router(ledger: Ledger) -> Router {
    let api_routes =
        create_router().layer(axum::middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
