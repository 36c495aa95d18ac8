//! ledger-maintenance: partition and retention maintenance
//!
//! Runs out of band from the request path. Each pass creates the monthly log
//! partitions ahead of time, drops months past retention and audits account
//! totals against their buckets.
//!
//! ## Usage
//! ```text
//! ledger-maintenance [--config <path>] [--once] [--json-logs]
//! ```
//!
//! ## Configuration
//! - LEDGER_CONFIG: configuration file path
//! - LEDGER__STORAGE__TYPE / LEDGER__STORAGE__POSTGRES__URI: storage backend
//! - LEDGER_LOG: tracing filter (default "info")

use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};

use bucket_ledger::config::Config;
use bucket_ledger::LedgerError;
use bucket_ledger::maintenance::{MaintenanceRunner, PartitionManager};
use bucket_ledger::storage::init_storage;
use bucket_ledger::utils::bootstrap::{
    has_flag, init_json_tracing, init_tracing, parse_config_path,
};
use bucket_ledger::utils::retry::connection_backoff;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if has_flag("--json-logs") {
        init_json_tracing();
    } else {
        init_tracing();
    }

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting ledger-maintenance");

    let storage = (|| async { init_storage(&config.storage).await })
        .retry(connection_backoff())
        .when(|e: &LedgerError| !e.is_business_rule())
        .notify(|err: &LedgerError, dur: Duration| {
            warn!(error = %err, delay = ?dur, "Storage unavailable, retrying");
        })
        .await?;
    info!("Storage initialized");

    let partitions = PartitionManager::new(storage.partitions.clone(), &config.maintenance);
    let runner = MaintenanceRunner::new(partitions, storage.ledger.clone(), &config.maintenance);

    let report = runner.run_once().await?;
    info!(
        created = report.created.len(),
        dropped = report.dropped.len(),
        drift = report.drift.len(),
        "Initial maintenance pass complete"
    );

    if has_flag("--once") {
        return Ok(());
    }

    let maintenance = runner.spawn();

    info!(
        interval_secs = config.maintenance.interval_secs,
        "Maintenance running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    maintenance.abort();

    Ok(())
}
