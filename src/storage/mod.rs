//! Ledger storage.
//!
//! A [`LedgerStore`] owns the five ledger relations and performs every
//! multi-row mutation inside one database transaction: an ingestion
//! sub-batch, or a single redemption. Both backends lock rows in the global
//! key order produced by the planning modules and bound every lock wait, so a
//! wait that runs out surfaces as `LedgerError::ContentionTimeout` after a
//! full rollback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::ledger::model::{
    AccountTotals, BatchOutcome, BucketBalance, BucketDefinition, EarningKey, EarningTransaction,
    RedemptionReceipt, RedemptionRequest, RedemptionTransaction, TotalDrift,
};
use crate::maintenance::PartitionCatalog;
use crate::reference::BucketDefinitionSource;

pub mod schema;
pub mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;

pub use crate::error::Result;

/// Transactional access to ledger state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Apply one ingestion sub-batch atomically.
    ///
    /// New identity keys append a log row; existing keys are corrected in
    /// place and only their difference reaches the balances. Either every
    /// record of the batch is applied or none is.
    async fn apply_earning_batch(&self, records: &[EarningTransaction]) -> Result<BatchOutcome>;

    /// Redeem value from an account's buckets of one type, earliest expiry
    /// first.
    ///
    /// Fails with `InsufficientBalance` without writing anything when the
    /// locked buckets do not cover the amount.
    async fn redeem(&self, request: &RedemptionRequest) -> Result<RedemptionReceipt>;

    /// Remaining value per bucket type, read from the totals cache only.
    async fn account_totals(&self, account: &str) -> Result<AccountTotals>;

    /// Every bucket of an account and type, exhausted ones included,
    /// ordered by bucket instance id.
    async fn bucket_balances(&self, account: &str, bucket_type: &str) -> Result<Vec<BucketBalance>>;

    /// A single earning log row.
    async fn earning(&self, key: &EarningKey) -> Result<Option<EarningTransaction>>;

    /// Redemptions of an account, newest first.
    async fn redemptions(&self, account: &str) -> Result<Vec<RedemptionTransaction>>;

    /// Publish bucket definitions into the reference table.
    async fn upsert_bucket_definitions(&self, definitions: &[BucketDefinition]) -> Result<usize>;

    /// Account totals that disagree with the sum of their buckets.
    async fn reconcile_totals(&self) -> Result<Vec<TotalDrift>>;
}

/// Everything one storage backend provides.
///
/// All three handles point at the same backend instance.
#[derive(Clone)]
pub struct StorageHandles {
    pub ledger: Arc<dyn LedgerStore>,
    pub definitions: Arc<dyn BucketDefinitionSource>,
    pub partitions: Arc<dyn PartitionCatalog>,
}

impl StorageHandles {
    fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: LedgerStore + BucketDefinitionSource + PartitionCatalog + 'static,
    {
        Self {
            ledger: store.clone(),
            definitions: store.clone(),
            partitions: store,
        }
    }
}

/// Initialize storage based on configuration.
///
/// Connects the pool, creates the schema if missing and returns the backend
/// behind its trait objects.
pub async fn init_storage(config: &StorageConfig) -> Result<StorageHandles> {
    match config.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                info!(path = %config.sqlite.path, "Storage: sqlite");
                let pool = sqlite::connect(config).await?;
                let store = Arc::new(SqliteLedgerStore::new(pool));
                store.init().await?;
                Ok(StorageHandles::from_backend(store))
            }
            #[cfg(not(feature = "sqlite"))]
            {
                tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
                Err(crate::error::StorageError::UnknownBackend("sqlite (feature not enabled)".to_string()).into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                info!("Storage: postgres");
                let pool = postgres::connect(config).await?;
                let store = Arc::new(PostgresLedgerStore::new(
                    pool,
                    config.lock_timeout(),
                    config.statement_timeout(),
                ));
                store.init().await?;
                Ok(StorageHandles::from_backend(store))
            }
            #[cfg(not(feature = "postgres"))]
            {
                tracing::error!("PostgreSQL storage requested but 'postgres' feature is not enabled");
                Err(crate::error::StorageError::UnknownBackend("postgres (feature not enabled)".to_string()).into())
            }
        }
    }
}
