//! Periodic maintenance task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::PartitionManager;
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::ledger::model::TotalDrift;
use crate::storage::LedgerStore;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub created: Vec<String>,
    pub dropped: Vec<String>,
    pub drift: Vec<TotalDrift>,
}

/// Background task that prepares partitions, enforces retention and audits
/// the totals cache.
pub struct MaintenanceRunner {
    partitions: PartitionManager,
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
}

impl MaintenanceRunner {
    pub fn new(
        partitions: PartitionManager,
        ledger: Arc<dyn LedgerStore>,
        config: &MaintenanceConfig,
    ) -> Self {
        Self {
            partitions,
            ledger,
            interval: config.interval(),
        }
    }

    /// Set custom run interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one pass (for startup, testing or manual invocation).
    ///
    /// Drift is reported, never repaired.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let now = Utc::now();
        let created = self.partitions.ensure_future_partitions(now).await?;
        let dropped = self.partitions.purge_expired(now).await?;
        let drift = self.ledger.reconcile_totals().await?;

        for d in &drift {
            warn!(
                account = %d.account,
                bucket_type = %d.bucket_type,
                cached = d.cached,
                actual = d.actual,
                "Account total drifted from bucket balances"
            );
        }

        Ok(MaintenanceReport {
            created,
            dropped,
            drift,
        })
    }

    /// Spawn the runner as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(report) if !report.created.is_empty() || !report.dropped.is_empty() => {
                        info!(
                            created = report.created.len(),
                            dropped = report.dropped.len(),
                            "Maintenance pass changed partitions"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Maintenance pass failed");
                    }
                }
            }
        })
    }
}
