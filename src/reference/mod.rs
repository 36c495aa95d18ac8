//! Bucket definition reference data.
//!
//! Definitions are owned by an external collaborator; this crate only reads
//! them. [`BucketDefinitionCache`] is the explicit read-through cache over a
//! [`BucketDefinitionSource`]: lookups are served from an in-memory snapshot
//! no older than `max_staleness`, and the snapshot is reloaded either on
//! demand or by a refresher task whose handle belongs to whoever spawned it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReferenceConfig;
use crate::error::Result;
use crate::ledger::model::BucketDefinition;

/// Read access to bucket definitions.
#[async_trait]
pub trait BucketDefinitionSource: Send + Sync {
    /// Load every definition.
    async fn load_definitions(&self) -> Result<Vec<BucketDefinition>>;

    /// Fetch a single definition.
    async fn fetch_definition(&self, bucket_instance_id: &str) -> Result<Option<BucketDefinition>>;
}

#[derive(Default)]
struct Snapshot {
    entries: HashMap<String, BucketDefinition>,
    loaded_at: Option<Instant>,
}

impl Snapshot {
    fn is_fresh(&self, max_staleness: Duration) -> bool {
        self.loaded_at
            .is_some_and(|at| Instant::now().duration_since(at) < max_staleness)
    }
}

/// Read-through cache of bucket definitions with a bounded staleness.
pub struct BucketDefinitionCache {
    source: Arc<dyn BucketDefinitionSource>,
    refresh_interval: Duration,
    max_staleness: Duration,
    snapshot: RwLock<Snapshot>,
}

impl BucketDefinitionCache {
    pub fn new(
        source: Arc<dyn BucketDefinitionSource>,
        refresh_interval: Duration,
        max_staleness: Duration,
    ) -> Self {
        Self {
            source,
            refresh_interval,
            max_staleness,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn from_config(source: Arc<dyn BucketDefinitionSource>, config: &ReferenceConfig) -> Self {
        Self::new(source, config.refresh_interval(), config.max_staleness())
    }

    /// Look up a definition.
    ///
    /// Reloads the snapshot first when it is older than `max_staleness`. A
    /// miss on a fresh snapshot falls through to a single-key fetch, and a
    /// hit from that fetch is kept until the next reload.
    pub async fn lookup(&self, bucket_instance_id: &str) -> Result<Option<BucketDefinition>> {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.is_fresh(self.max_staleness) {
                if let Some(definition) = snapshot.entries.get(bucket_instance_id) {
                    return Ok(Some(definition.clone()));
                }
            }
        }

        let stale = !self.snapshot.read().await.is_fresh(self.max_staleness);
        if stale {
            self.refresh().await?;
            if let Some(definition) = self.snapshot.read().await.entries.get(bucket_instance_id) {
                return Ok(Some(definition.clone()));
            }
            return Ok(None);
        }

        let fetched = self.source.fetch_definition(bucket_instance_id).await?;
        if let Some(definition) = &fetched {
            debug!(bucket_instance_id = %bucket_instance_id, "Bucket definition fetched on miss");
            self.snapshot
                .write()
                .await
                .entries
                .insert(bucket_instance_id.to_string(), definition.clone());
        }
        Ok(fetched)
    }

    /// Reload the whole snapshot from the source.
    ///
    /// Returns the number of definitions loaded. On failure the previous
    /// snapshot stays in place and keeps aging.
    pub async fn refresh(&self) -> Result<usize> {
        let definitions = self.source.load_definitions().await?;
        let count = definitions.len();
        let entries = definitions
            .into_iter()
            .map(|d| (d.bucket_instance_id.clone(), d))
            .collect();

        *self.snapshot.write().await = Snapshot {
            entries,
            loaded_at: Some(Instant::now()),
        };
        debug!(definitions = count, "Bucket definition cache refreshed");
        Ok(count)
    }

    /// Age of the current snapshot, `None` before the first load.
    pub async fn age(&self) -> Option<Duration> {
        self.snapshot
            .read()
            .await
            .loaded_at
            .map(|at| Instant::now().duration_since(at))
    }

    /// Spawn the periodic refresher.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_refresher(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.refresh_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                interval_secs = cache.refresh_interval.as_secs(),
                "Bucket definition refresher started"
            );

            loop {
                interval.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!(error = %e, "Bucket definition refresh failed");
                }
            }
        })
    }
}
