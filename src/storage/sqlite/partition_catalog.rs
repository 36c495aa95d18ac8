//! Emulated monthly partitions for SQLite.
//!
//! SQLite has no declarative partitioning. A partition here is the set of
//! log rows whose `created_at` falls in one month; `ledger_partitions`
//! remembers months prepared ahead of any data. Dropping a month raises the
//! retention watermark first so the redemption delete guard admits the
//! range delete.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, OnConflict, Query};
use tracing::debug;

use super::SqliteLedgerStore;
use crate::ledger::model::{millis_to_datetime, now_millis};
use crate::maintenance::{LogTable, MonthPeriod, PartitionCatalog};
use crate::storage::schema::LedgerPartitions;
use crate::storage::sql::sqlite::Sqlite;
use crate::storage::sql::{statements, SqlDatabase};
use crate::storage::Result;

const RAISE_WATERMARK: &str = r#"
INSERT INTO ledger_retention (table_name, watermark) VALUES (?, ?)
ON CONFLICT (table_name) DO UPDATE
SET watermark = MAX(ledger_retention.watermark, excluded.watermark)
"#;

impl SqliteLedgerStore {
    async fn drop_month(
        conn: &mut sqlx::SqliteConnection,
        table: LogTable,
        period: MonthPeriod,
    ) -> Result<u64> {
        if table == LogTable::Redemptions {
            sqlx::query(RAISE_WATERMARK)
                .bind(table.table_name())
                .bind(period.end_millis())
                .execute(&mut *conn)
                .await?;
        }

        let sql = Sqlite::build_delete(statements::delete_created_between(
            Alias::new(table.table_name()),
            Alias::new("created_at"),
            period.start_millis(),
            period.end_millis(),
        ));
        let deleted = sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();

        let sql = Sqlite::build_delete(
            Query::delete()
                .from_table(LedgerPartitions::Table)
                .and_where(Expr::col(LedgerPartitions::TableName).eq(table.table_name()))
                .and_where(Expr::col(LedgerPartitions::Period).eq(period.suffix()))
                .to_owned(),
        );
        sqlx::query(&sql).execute(&mut *conn).await?;

        Ok(deleted)
    }
}

#[async_trait]
impl PartitionCatalog for SqliteLedgerStore {
    async fn list_partitions(&self, table: LogTable) -> Result<Vec<MonthPeriod>> {
        let sql = format!(
            "SELECT period FROM ledger_partitions WHERE table_name = ? \
             UNION \
             SELECT strftime('%Y%m', created_at / 1000, 'unixepoch') FROM {}",
            table.table_name()
        );
        let rows: Vec<(Option<String>,)> = sqlx::query_as(&sql)
            .bind(table.table_name())
            .fetch_all(self.pool())
            .await?;

        let periods: BTreeSet<MonthPeriod> = rows
            .into_iter()
            .filter_map(|(raw,)| raw.as_deref().and_then(MonthPeriod::parse_suffix))
            .collect();
        Ok(periods.into_iter().collect())
    }

    /// Registers the month. Hash subdivision does not apply to SQLite.
    async fn create_partition(
        &self,
        table: LogTable,
        period: MonthPeriod,
        _hash_partitions: u32,
    ) -> Result<bool> {
        let sql = Sqlite::build_insert(
            Query::insert()
                .into_table(LedgerPartitions::Table)
                .columns([
                    LedgerPartitions::TableName,
                    LedgerPartitions::Period,
                    LedgerPartitions::CreatedAt,
                ])
                .values_panic([
                    table.table_name().into(),
                    period.suffix().into(),
                    now_millis().timestamp_millis().into(),
                ])
                .on_conflict(
                    OnConflict::columns([LedgerPartitions::TableName, LedgerPartitions::Period])
                        .do_nothing()
                        .to_owned(),
                )
                .to_owned(),
        );
        let done = sqlx::query(&sql).execute(self.pool()).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn max_last_modified(
        &self,
        table: LogTable,
        period: MonthPeriod,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = Sqlite::build_select(
            Query::select()
                .expr(Expr::col(Alias::new(table.modified_column())).max())
                .from(Alias::new(table.table_name()))
                .and_where(Expr::col(Alias::new("created_at")).gte(period.start_millis()))
                .and_where(Expr::col(Alias::new("created_at")).lt(period.end_millis()))
                .to_owned(),
        );
        let (max,): (Option<i64>,) = sqlx::query_as(&sql).fetch_one(self.pool()).await?;
        Ok(max.and_then(millis_to_datetime))
    }

    async fn drop_partition(&self, table: LogTable, period: MonthPeriod) -> Result<()> {
        let mut tx = self.begin_immediate().await?;
        let result = Self::drop_month(&mut tx, table, period).await;
        let deleted = Self::finish(tx, result).await?;
        debug!(
            table = %table,
            period = %period,
            rows = deleted,
            "SQLite partition range deleted"
        );
        Ok(())
    }
}
