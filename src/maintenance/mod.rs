//! Partitioning and retention for the append-only logs.
//!
//! Both logs are partitioned by calendar month of their immutable
//! `created_at` timestamp. [`PartitionManager`] keeps partitions prepared
//! ahead of time and drops whole months once they fall behind the retention
//! horizon, so pruning never deletes rows one by one on the hot path. The
//! physical layout is a backend concern behind [`PartitionCatalog`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info};

use crate::config::MaintenanceConfig;
use crate::error::Result;

mod runner;

pub use runner::{MaintenanceReport, MaintenanceRunner};

/// A partitioned log relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogTable {
    Earnings,
    Redemptions,
}

impl LogTable {
    pub const ALL: [LogTable; 2] = [LogTable::Earnings, LogTable::Redemptions];

    pub fn table_name(self) -> &'static str {
        match self {
            LogTable::Earnings => "earning_transactions",
            LogTable::Redemptions => "redemption_transactions",
        }
    }

    /// Column holding a row's latest modification. Redemptions never change
    /// after insert, so their creation time serves.
    pub fn modified_column(self) -> &'static str {
        match self {
            LogTable::Earnings => "last_modified",
            LogTable::Redemptions => "created_at",
        }
    }

    /// `<table>_pYYYYMM`
    pub fn partition_name(self, period: MonthPeriod) -> String {
        format!("{}_p{}", self.table_name(), period.suffix())
    }
}

impl fmt::Display for LogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// One calendar month, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthPeriod {
    first_day: NaiveDate,
}

impl MonthPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    /// The month containing `at`.
    pub fn containing(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        Self {
            first_day: date - Days::new(u64::from(date.day0())),
        }
    }

    /// The month containing an epoch-millisecond timestamp.
    pub fn containing_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self::containing)
    }

    pub fn year(self) -> i32 {
        self.first_day.year()
    }

    pub fn month(self) -> u32 {
        self.first_day.month()
    }

    pub fn add_months(self, months: i32) -> Self {
        let delta = Months::new(months.unsigned_abs());
        let first_day = if months >= 0 {
            self.first_day + delta
        } else {
            self.first_day - delta
        };
        Self { first_day }
    }

    pub fn next(self) -> Self {
        self.add_months(1)
    }

    /// Inclusive lower bound.
    pub fn start(self) -> DateTime<Utc> {
        self.first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// Exclusive upper bound.
    pub fn end(self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn start_millis(self) -> i64 {
        self.start().timestamp_millis()
    }

    pub fn end_millis(self) -> i64 {
        self.end().timestamp_millis()
    }

    /// `YYYYMM`
    pub fn suffix(self) -> String {
        self.first_day.format("%Y%m").to_string()
    }

    pub fn parse_suffix(raw: &str) -> Option<Self> {
        if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = raw[..4].parse().ok()?;
        let month = raw[4..].parse().ok()?;
        Self::new(year, month)
    }

    /// Recover the period from a `<table>_pYYYYMM` partition name.
    pub fn from_partition_name(table: LogTable, name: &str) -> Option<Self> {
        name.strip_prefix(table.table_name())
            .and_then(|rest| rest.strip_prefix("_p"))
            .and_then(Self::parse_suffix)
    }
}

impl fmt::Display for MonthPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Backend-specific partition operations.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    /// Monthly partitions currently present for a log table.
    async fn list_partitions(&self, table: LogTable) -> Result<Vec<MonthPeriod>>;

    /// Create a monthly partition, subdivided into `hash_partitions` by
    /// account where the backend supports it. Returns `false` when the
    /// partition already existed.
    async fn create_partition(
        &self,
        table: LogTable,
        period: MonthPeriod,
        hash_partitions: u32,
    ) -> Result<bool>;

    /// Newest modification time of any row in the partition, `None` when
    /// it is empty.
    async fn max_last_modified(
        &self,
        table: LogTable,
        period: MonthPeriod,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Remove the partition and every row in it.
    async fn drop_partition(&self, table: LogTable, period: MonthPeriod) -> Result<()>;
}

/// Plans partition creation ahead of time and retention drops.
pub struct PartitionManager {
    catalog: Arc<dyn PartitionCatalog>,
    months_ahead: u32,
    hash_partitions: u32,
    retention_months: u32,
}

impl PartitionManager {
    pub fn new(catalog: Arc<dyn PartitionCatalog>, config: &MaintenanceConfig) -> Self {
        Self {
            catalog,
            months_ahead: config.months_ahead,
            hash_partitions: config.hash_partitions,
            retention_months: config.retention_months,
        }
    }

    /// Oldest instant still inside the retention window.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.retention_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Create the current month and `months_ahead` following months for
    /// every log table. Returns the names of partitions that were created.
    pub async fn ensure_future_partitions(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let current = MonthPeriod::containing(now);
        let mut created = Vec::new();

        for table in LogTable::ALL {
            let existing: BTreeSet<MonthPeriod> =
                self.catalog.list_partitions(table).await?.into_iter().collect();

            for offset in 0..=self.months_ahead {
                let period = current.add_months(offset as i32);
                if existing.contains(&period) {
                    continue;
                }
                if self
                    .catalog
                    .create_partition(table, period, self.hash_partitions)
                    .await?
                {
                    let name = table.partition_name(period);
                    info!(partition = %name, "Partition created");
                    created.push(name);
                }
            }
        }

        Ok(created)
    }

    /// Drop every monthly partition that ends at or before the horizon and
    /// holds no row modified at or after it. Returns the dropped names.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let horizon = self.horizon(now);
        let mut dropped = Vec::new();

        for table in LogTable::ALL {
            let mut periods = self.catalog.list_partitions(table).await?;
            periods.sort();

            for period in periods {
                if period.end() > horizon {
                    continue;
                }
                let name = table.partition_name(period);
                if let Some(modified) = self.catalog.max_last_modified(table, period).await? {
                    if modified >= horizon {
                        debug!(
                            partition = %name,
                            last_modified = %modified,
                            "Partition kept: corrected inside retention window"
                        );
                        continue;
                    }
                }
                self.catalog.drop_partition(table, period).await?;
                info!(partition = %name, horizon = %horizon, "Partition dropped");
                dropped.push(name);
            }
        }

        Ok(dropped)
    }
}

#[cfg(test)]
mod tests;
