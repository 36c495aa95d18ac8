//! SQLite LedgerStore implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::{LedgerError, StorageError};
use crate::ledger::allocation::{allocate, Candidate};
use crate::ledger::ingest::{correction_underflow, dedupe_last_wins, plan_batch, LogWrite};
use crate::ledger::model::{
    now_millis, AccountTotals, BatchOutcome, BucketBalance, BucketDefinition, EarningKey,
    EarningTransaction, RedemptionReceipt, RedemptionRequest, RedemptionTransaction, TotalDrift,
};
use crate::reference::BucketDefinitionSource;
use crate::storage::schema::SQLITE_SCHEMA;
use crate::storage::sql::rows::{
    convert_all, BucketRow, CandidateRow, DefinitionRow, DriftRow, EarningRow, RedemptionRow,
    StoredEarningRow, TotalRow,
};
use crate::storage::sql::sqlite::Sqlite;
use crate::storage::sql::{statements, SqlDatabase};
use crate::storage::{LedgerStore, Result};

/// SQLite implementation of LedgerStore.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables, indexes and the append-only triggers.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SQLITE_SCHEMA).execute(&self.pool).await?;
        info!("SQLite ledger schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction holding the database write lock.
    ///
    /// BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
    /// when concurrent DEFERRED transactions race to upgrade from shared to
    /// exclusive. Dropping the transaction before `finish` queues a rollback
    /// that runs before the connection is reused.
    pub(super) async fn begin_immediate(&self) -> Result<Transaction<'static, sqlx::Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Commit on success, roll back on any failure.
    pub(super) async fn finish<T>(
        tx: Transaction<'static, sqlx::Sqlite>,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Apply a sub-batch within an already-started transaction.
    async fn apply_batch(
        conn: &mut SqliteConnection,
        records: &[EarningTransaction],
    ) -> Result<BatchOutcome> {
        let now = now_millis().timestamp_millis();
        let unique = dedupe_last_wins(records);

        let mut stored = HashMap::new();
        for key in unique.keys() {
            let sql = Sqlite::build_select(statements::select_stored_earning(key));
            let row: Option<StoredEarningRow> =
                sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
            if let Some(row) = row {
                stored.insert(key.clone(), row.into());
            }
        }

        let plan = plan_batch(unique, &stored)?;

        for write in &plan.log_writes {
            let sql = match write {
                LogWrite::Insert(record) => {
                    Sqlite::build_insert(statements::insert_earning(record, now))
                }
                LogWrite::Correct(record) => {
                    debug!(
                        transaction_id = %record.transaction_id,
                        bucket_instance_id = %record.bucket_instance_id,
                        "Correcting earning row"
                    );
                    Sqlite::build_update(statements::correct_earning(record))
                }
            };
            sqlx::query(&sql).execute(&mut *conn).await?;
        }

        for (key, delta) in &plan.bucket_deltas {
            let sql = Sqlite::build_insert(statements::upsert_bucket(key, *delta, now));
            let (remaining,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
            if remaining < 0 {
                return Err(correction_underflow(&key.bucket_instance_id, remaining).into());
            }
        }

        for (key, delta) in &plan.total_deltas {
            let sql = Sqlite::build_insert(statements::upsert_total(key, *delta, now));
            let (remaining,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
            if remaining < 0 {
                return Err(correction_underflow(&key.bucket_type, remaining).into());
            }
        }

        Ok(plan.outcome())
    }

    /// Allocate and record a redemption within an already-started transaction.
    async fn redeem_in_tx(
        conn: &mut SqliteConnection,
        request: &RedemptionRequest,
    ) -> Result<RedemptionReceipt> {
        let sql = Sqlite::build_select(statements::select_candidates(
            &request.account,
            &request.bucket_type,
        ));
        let rows: Vec<CandidateRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
        let candidates: Vec<Candidate> = convert_all(rows)?;

        let allocation =
            allocate(candidates, request.amount).map_err(|shortfall| shortfall.into_error(request))?;

        let now = now_millis();
        let now_ms = now.timestamp_millis();

        for deduction in &allocation.deductions {
            let sql = Sqlite::build_update(statements::deduct_bucket(
                &request.account,
                &request.bucket_type,
                deduction,
                now_ms,
            ));
            let done = sqlx::query(&sql).execute(&mut *conn).await?;
            if done.rows_affected() != 1 {
                return Err(StorageError::ConcurrentModification {
                    bucket_instance_id: deduction.bucket_instance_id.clone(),
                }
                .into());
            }
        }

        let sql = Sqlite::build_update(statements::deduct_total(
            &request.account,
            &request.bucket_type,
            allocation.total,
            now_ms,
        ));
        if sqlx::query(&sql).execute(&mut *conn).await?.rows_affected() != 1 {
            return Err(StorageError::CorruptRow {
                table: "account_total_balances",
                reason: format!(
                    "total for {}/{} missing or below bucket sum",
                    request.account, request.bucket_type
                ),
            }
            .into());
        }

        let redemption = allocation.to_redemption(request, now);
        let sql = Sqlite::build_insert(statements::insert_redemption(&redemption)?);
        sqlx::query(&sql).execute(&mut *conn).await?;

        Ok(redemption.receipt())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn apply_earning_batch(&self, records: &[EarningTransaction]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut tx = self.begin_immediate().await?;
        let result = Self::apply_batch(&mut tx, records).await;
        Self::finish(tx, result).await
    }

    async fn redeem(&self, request: &RedemptionRequest) -> Result<RedemptionReceipt> {
        let mut tx = self.begin_immediate().await?;
        let result = Self::redeem_in_tx(&mut tx, request).await;
        Self::finish(tx, result).await
    }

    async fn account_totals(&self, account: &str) -> Result<AccountTotals> {
        let sql = Sqlite::build_select(statements::select_totals(account));
        let rows: Vec<TotalRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.bucket_type, row.remaining))
            .collect())
    }

    async fn bucket_balances(&self, account: &str, bucket_type: &str) -> Result<Vec<BucketBalance>> {
        let sql = Sqlite::build_select(statements::select_buckets(account, bucket_type));
        let rows: Vec<BucketRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn earning(&self, key: &EarningKey) -> Result<Option<EarningTransaction>> {
        let sql = Sqlite::build_select(statements::select_earning(key));
        let row: Option<EarningRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(EarningTransaction::try_from).transpose()?)
    }

    async fn redemptions(&self, account: &str) -> Result<Vec<RedemptionTransaction>> {
        let sql = Sqlite::build_select(statements::select_redemptions(account));
        let rows: Vec<RedemptionRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn upsert_bucket_definitions(&self, definitions: &[BucketDefinition]) -> Result<usize> {
        if definitions.is_empty() {
            return Ok(0);
        }

        let now = now_millis().timestamp_millis();
        let mut tx = self.begin_immediate().await?;
        let mut result = Ok(definitions.len());
        for definition in definitions {
            let sql = Sqlite::build_insert(statements::upsert_definition(definition, now));
            if let Err(e) = sqlx::query(&sql).execute(&mut *tx).await {
                result = Err(LedgerError::from(e));
                break;
            }
        }
        Self::finish(tx, result).await
    }

    async fn reconcile_totals(&self) -> Result<Vec<TotalDrift>> {
        let rows: Vec<DriftRow> = sqlx::query_as(statements::RECONCILE_TOTALS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TotalDrift::from).collect())
    }
}

#[async_trait]
impl BucketDefinitionSource for SqliteLedgerStore {
    async fn load_definitions(&self) -> Result<Vec<BucketDefinition>> {
        let sql = Sqlite::build_select(statements::select_definitions());
        let rows: Vec<DefinitionRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn fetch_definition(&self, bucket_instance_id: &str) -> Result<Option<BucketDefinition>> {
        let sql = Sqlite::build_select(statements::select_definition(bucket_instance_id));
        let row: Option<DefinitionRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(BucketDefinition::try_from).transpose()?)
    }
}
