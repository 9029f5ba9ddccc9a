//! Common test utilities

#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use finance_ledger::{Ledger, LedgerConfig};

/// Ledger over the in-memory backend
pub fn memory_ledger() -> Ledger {
    Ledger::in_memory(LedgerConfig::default())
}

/// Setup test database - migrate and truncate every ledger table
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    finance_ledger::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    // The append-only trigger rejects DELETE but not TRUNCATE
    sqlx::query(
        r#"
        TRUNCATE TABLE events, snapshots, processed_transactions,
                       account_summaries, transaction_history
        "#,
    )
    .execute(&mut *tx)
    .await
    .expect("Failed to clean up DB");

    sqlx::query("UPDATE projection_cursors SET events_processed = 0")
        .execute(&mut *tx)
        .await
        .expect("Failed to reset projection cursors");

    tx.commit().await.expect("Failed to commit cleanup");

    pool
}
