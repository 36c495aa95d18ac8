//! SQLite ledger backend.
//!
//! Every write transaction starts with `BEGIN IMMEDIATE`, taking the database
//! write lock up front. Writers are therefore serialized; the busy timeout
//! bounds how long one waits before the attempt fails as a contention
//! timeout.

mod ledger_store;
mod partition_catalog;

pub use ledger_store::SqliteLedgerStore;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage::Result;

/// Open a pool for the configured database file, or a private in-memory
/// database for `:memory:`.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    let path = config.sqlite.path.as_str();

    if path == ":memory:" {
        // Every connection would see its own empty database, so the pool is
        // pinned to one connection that is never recycled.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .busy_timeout(config.lock_timeout());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.lock_timeout());
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await?;
    Ok(pool)
}
