//! Native monthly partitions for PostgreSQL.
//!
//! Each month is a range partition of the log on `created_at`, itself
//! hash-partitioned by account into `<table>_pYYYYMM_hN` children. Dropping
//! a month is a single `DROP TABLE`, which bypasses the row-level append-only
//! trigger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use super::PostgresLedgerStore;
use crate::ledger::model::millis_to_datetime;
use crate::maintenance::{LogTable, MonthPeriod, PartitionCatalog};
use crate::storage::Result;

const LIST_CHILDREN: &str = r#"
SELECT c.relname::text
FROM pg_inherits i
JOIN pg_class c ON c.oid = i.inhrelid
JOIN pg_class p ON p.oid = i.inhparent
WHERE p.relname = $1
"#;

const RELATION_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL";

/// DDL for one month and its hash children.
fn partition_ddl(table: LogTable, period: MonthPeriod, hash_partitions: u32) -> Vec<String> {
    let name = table.partition_name(period);
    let range = format!(
        "CREATE TABLE IF NOT EXISTS {name} PARTITION OF {parent} FOR VALUES FROM ({start}) TO ({end})",
        parent = table.table_name(),
        start = period.start_millis(),
        end = period.end_millis(),
    );

    if hash_partitions <= 1 {
        return vec![range];
    }

    let mut ddl = vec![format!("{range} PARTITION BY HASH (account)")];
    ddl.extend((0..hash_partitions).map(|remainder| {
        format!(
            "CREATE TABLE IF NOT EXISTS {name}_h{remainder} PARTITION OF {name} \
             FOR VALUES WITH (MODULUS {hash_partitions}, REMAINDER {remainder})"
        )
    }));
    ddl
}

impl PostgresLedgerStore {
    async fn create_in_tx(
        conn: &mut PgConnection,
        table: LogTable,
        period: MonthPeriod,
        hash_partitions: u32,
    ) -> Result<bool> {
        let name = table.partition_name(period);
        let (exists,): (bool,) = sqlx::query_as(RELATION_EXISTS)
            .bind(&name)
            .fetch_one(&mut *conn)
            .await?;
        if exists {
            return Ok(false);
        }
        for statement in partition_ddl(table, period, hash_partitions) {
            sqlx::query(&statement).execute(&mut *conn).await?;
        }
        debug!(partition = %name, hash_partitions, "PostgreSQL partition created");
        Ok(true)
    }
}

#[async_trait]
impl PartitionCatalog for PostgresLedgerStore {
    async fn list_partitions(&self, table: LogTable) -> Result<Vec<MonthPeriod>> {
        let rows: Vec<(String,)> = sqlx::query_as(LIST_CHILDREN)
            .bind(table.table_name())
            .fetch_all(self.pool())
            .await?;

        let mut periods: Vec<MonthPeriod> = rows
            .iter()
            .filter_map(|(name,)| MonthPeriod::from_partition_name(table, name))
            .collect();
        periods.sort();
        Ok(periods)
    }

    async fn create_partition(
        &self,
        table: LogTable,
        period: MonthPeriod,
        hash_partitions: u32,
    ) -> Result<bool> {
        let mut tx = self.begin().await?;
        let result = Self::create_in_tx(&mut tx, table, period, hash_partitions).await;
        Self::finish(tx, result).await
    }

    async fn max_last_modified(
        &self,
        table: LogTable,
        period: MonthPeriod,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT MAX({column}) FROM {partition}",
            column = table.modified_column(),
            partition = table.partition_name(period),
        );
        let (max,): (Option<i64>,) = sqlx::query_as(&sql).fetch_one(self.pool()).await?;
        Ok(max.and_then(millis_to_datetime))
    }

    async fn drop_partition(&self, table: LogTable, period: MonthPeriod) -> Result<()> {
        let name = table.partition_name(period);
        let mut tx = self.begin().await?;
        let result = sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(&mut *tx)
            .await
            .map(|_| ())
            .map_err(Into::into);
        Self::finish(tx, result).await
    }
}
