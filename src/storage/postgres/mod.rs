//! PostgreSQL ledger backend.
//!
//! Transactions run at READ COMMITTED with explicit row locks. Each one sets
//! `lock_timeout` and `statement_timeout` locally, so a lock wait or a slow
//! statement aborts the transaction with a SQLSTATE the error layer maps to a
//! contention timeout.

mod ledger_store;
mod partition_catalog;

pub use ledger_store::PostgresLedgerStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::StorageConfig;
use crate::storage::Result;

/// Open a pool against the configured URI.
pub async fn connect(config: &StorageConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.postgres.uri)
        .await?;
    Ok(pool)
}
