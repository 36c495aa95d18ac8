use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::TimeZone;

use super::*;

#[derive(Default)]
struct FakeCatalog {
    partitions: Mutex<BTreeMap<(LogTable, MonthPeriod), Option<DateTime<Utc>>>>,
}

impl FakeCatalog {
    fn with(self, table: LogTable, period: MonthPeriod, modified: Option<DateTime<Utc>>) -> Self {
        self.partitions
            .lock()
            .unwrap()
            .insert((table, period), modified);
        self
    }

    fn has(&self, table: LogTable, period: MonthPeriod) -> bool {
        self.partitions.lock().unwrap().contains_key(&(table, period))
    }
}

#[async_trait]
impl PartitionCatalog for FakeCatalog {
    async fn list_partitions(&self, table: LogTable) -> Result<Vec<MonthPeriod>> {
        Ok(self
            .partitions
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| *t == table)
            .map(|(_, p)| *p)
            .collect())
    }

    async fn create_partition(
        &self,
        table: LogTable,
        period: MonthPeriod,
        _hash_partitions: u32,
    ) -> Result<bool> {
        let mut partitions = self.partitions.lock().unwrap();
        if partitions.contains_key(&(table, period)) {
            return Ok(false);
        }
        partitions.insert((table, period), None);
        Ok(true)
    }

    async fn max_last_modified(
        &self,
        table: LogTable,
        period: MonthPeriod,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .partitions
            .lock()
            .unwrap()
            .get(&(table, period))
            .copied()
            .flatten())
    }

    async fn drop_partition(&self, table: LogTable, period: MonthPeriod) -> Result<()> {
        self.partitions.lock().unwrap().remove(&(table, period));
        Ok(())
    }
}

fn month(year: i32, month: u32) -> MonthPeriod {
    MonthPeriod::new(year, month).unwrap()
}

fn manager(catalog: Arc<FakeCatalog>, months_ahead: u32, retention_months: u32) -> PartitionManager {
    let config = MaintenanceConfig {
        months_ahead,
        retention_months,
        ..MaintenanceConfig::default()
    };
    PartitionManager::new(catalog, &config)
}

#[test]
fn test_period_bounds() {
    let march = month(2024, 3);
    assert_eq!(march.start(), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(march.end(), Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    assert_eq!(month(2024, 12).next(), month(2025, 1));
    assert_eq!(month(2024, 1).add_months(-1), month(2023, 12));
}

#[test]
fn test_period_containing() {
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
    assert_eq!(MonthPeriod::containing(at), month(2024, 2));
    assert_eq!(
        MonthPeriod::containing_millis(month(2024, 5).start_millis()),
        Some(month(2024, 5))
    );
}

#[test]
fn test_partition_naming() {
    let name = LogTable::Earnings.partition_name(month(2024, 7));
    assert_eq!(name, "earning_transactions_p202407");
    assert_eq!(
        MonthPeriod::from_partition_name(LogTable::Earnings, &name),
        Some(month(2024, 7))
    );
    assert_eq!(
        MonthPeriod::from_partition_name(LogTable::Redemptions, &name),
        None
    );
    assert_eq!(MonthPeriod::parse_suffix("202413"), None);
    assert_eq!(MonthPeriod::parse_suffix("2024-1"), None);
}

#[tokio::test]
async fn test_ensure_creates_current_and_future_months() {
    let catalog = Arc::new(FakeCatalog::default().with(LogTable::Earnings, month(2024, 5), None));
    let manager = manager(catalog.clone(), 2, 24);
    let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();

    let created = manager.ensure_future_partitions(now).await.unwrap();

    assert_eq!(created.len(), 5);
    assert!(created.contains(&"redemption_transactions_p202405".to_string()));
    assert!(catalog.has(LogTable::Earnings, month(2024, 7)));
    assert!(!catalog.has(LogTable::Earnings, month(2024, 8)));

    let again = manager.ensure_future_partitions(now).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_purge_drops_only_expired_untouched_months() {
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let catalog = Arc::new(
        FakeCatalog::default()
            // Ends before the horizon, last touched long ago.
            .with(
                LogTable::Earnings,
                month(2023, 1),
                Some(Utc.with_ymd_and_hms(2023, 1, 20, 0, 0, 0).unwrap()),
            )
            // Ends before the horizon but corrected recently.
            .with(
                LogTable::Earnings,
                month(2023, 2),
                Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            )
            // Straddles the horizon.
            .with(LogTable::Earnings, month(2023, 6), None)
            .with(LogTable::Redemptions, month(2023, 1), None),
    );
    let manager = manager(catalog.clone(), 0, 12);

    let dropped = manager.purge_expired(now).await.unwrap();

    assert_eq!(
        dropped,
        vec![
            "earning_transactions_p202301".to_string(),
            "redemption_transactions_p202301".to_string(),
        ]
    );
    assert!(catalog.has(LogTable::Earnings, month(2023, 2)));
    assert!(catalog.has(LogTable::Earnings, month(2023, 6)));
}

#[test]
fn test_horizon_is_retention_months_back() {
    let manager = manager(Arc::new(FakeCatalog::default()), 0, 24);
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    assert_eq!(
        manager.horizon(now),
        Utc.with_ymd_and_hms(2022, 6, 15, 0, 0, 0).unwrap()
    );
}
