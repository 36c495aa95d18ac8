//! Ledger service facade.
//!
//! `LedgerService` is the entry point callers use: it validates untrusted
//! input, splits ingestion into sub-batches, retries contended sub-batches,
//! suppresses duplicate redemptions and delegates every state change to a
//! [`LedgerStore`].

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{debug, info, warn};

use super::idempotency::{Fingerprint, IdempotencyGuard};
use super::model::{
    AccountTotals, BatchOutcome, BucketBalance, BucketDefinition, EarningKey, EarningTransaction,
    RedemptionReceipt, RedemptionRequest, RedemptionTransaction, TotalDrift,
};
use super::validation::{
    validate_account, validate_against_definition, validate_batch, validate_bucket_type,
    validate_redemption,
};
use crate::config::{Config, IngestionConfig};
use crate::error::{LedgerError, Result};
use crate::reference::BucketDefinitionCache;
use crate::storage::LedgerStore;
use crate::utils::retry::ingestion_backoff;

/// Validating, de-duplicating front of a [`LedgerStore`].
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
    definitions: Option<Arc<BucketDefinitionCache>>,
    ingestion: IngestionConfig,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, config: &Config) -> Self {
        Self {
            store,
            guard: IdempotencyGuard::from_config(&config.idempotency),
            definitions: None,
            ingestion: config.ingestion.clone(),
        }
    }

    /// Check ingested records against bucket definitions served by `cache`.
    pub fn with_definitions(mut self, cache: Arc<BucketDefinitionCache>) -> Self {
        self.definitions = Some(cache);
        self
    }

    /// Ingest earning records.
    ///
    /// The whole input is validated before anything is written. Records are
    /// then applied in sub-batches of `ingestion.batch_size`, each in its own
    /// transaction. A sub-batch that times out on a lock is retried with
    /// backoff; replaying one is harmless because records are keyed by their
    /// natural identity. When a sub-batch fails for good, the sub-batches
    /// before it stay applied and resubmitting the whole input is safe.
    #[tracing::instrument(name = "ledger.ingest", skip_all, fields(records = records.len()))]
    pub async fn ingest(&self, records: &[EarningTransaction]) -> Result<BatchOutcome> {
        validate_batch(records)?;
        self.check_definitions(records).await?;

        let batch_size = self.ingestion.batch_size.max(1);
        let mut outcome = BatchOutcome::default();

        for (index, chunk) in records.chunks(batch_size).enumerate() {
            let applied = (|| async { self.store.apply_earning_batch(chunk).await })
                .retry(ingestion_backoff(self.ingestion.max_retries))
                .when(|e: &LedgerError| e.is_retryable())
                .notify(|err: &LedgerError, dur: Duration| {
                    warn!(
                        sub_batch = index,
                        error = %err,
                        delay = ?dur,
                        "Ingestion sub-batch contended, retrying"
                    );
                })
                .await?;

            debug!(
                sub_batch = index,
                applied = applied.applied,
                corrected = applied.corrected,
                buckets = applied.buckets_touched,
                "Sub-batch applied"
            );
            outcome.merge(applied);
        }

        info!(
            applied = outcome.applied,
            corrected = outcome.corrected,
            buckets = outcome.buckets_touched,
            "Earnings ingested"
        );
        Ok(outcome)
    }

    async fn check_definitions(&self, records: &[EarningTransaction]) -> Result<()> {
        let Some(cache) = &self.definitions else {
            return Ok(());
        };
        if !self.ingestion.check_definitions {
            return Ok(());
        }

        for (index, record) in records.iter().enumerate() {
            let definition = cache.lookup(&record.bucket_instance_id).await?;
            validate_against_definition(record, definition.as_ref()).map_err(|e| e.at(index))?;
        }
        Ok(())
    }

    /// Redeem value, earliest-expiring buckets first.
    ///
    /// An identical request inside the idempotency window is rejected with
    /// `DuplicateRequest`. A failed attempt releases its fingerprint so the
    /// caller may resubmit. Redemptions are never retried here.
    #[tracing::instrument(
        name = "ledger.redeem",
        skip_all,
        fields(account = %request.account, bucket_type = %request.bucket_type, amount = request.amount)
    )]
    pub async fn redeem(&self, request: &RedemptionRequest) -> Result<RedemptionReceipt> {
        validate_redemption(request)?;

        let fingerprint = Fingerprint::for_redemption(request);
        if !self.guard.check_and_record(fingerprint).await {
            debug!(fingerprint = %fingerprint.to_hex(), "Duplicate redemption suppressed");
            return Err(LedgerError::DuplicateRequest {
                fingerprint: fingerprint.to_hex(),
            });
        }

        match self.store.redeem(request).await {
            Ok(receipt) => {
                info!(
                    redemption_id = %receipt.redemption_id,
                    buckets = receipt.detail.len(),
                    "Redemption recorded"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.guard.release(&fingerprint).await;
                if e.is_business_rule() {
                    debug!(error = %e, "Redemption rejected");
                } else {
                    warn!(error = %e, "Redemption failed");
                }
                Err(e)
            }
        }
    }

    /// Remaining value per bucket type.
    pub async fn balance(&self, account: &str) -> Result<AccountTotals> {
        validate_account(account)?;
        self.store.account_totals(account).await
    }

    pub async fn bucket_balances(&self, account: &str, bucket_type: &str) -> Result<Vec<BucketBalance>> {
        validate_account(account)?;
        validate_bucket_type(bucket_type)?;
        self.store.bucket_balances(account, bucket_type).await
    }

    pub async fn redemptions(&self, account: &str) -> Result<Vec<RedemptionTransaction>> {
        validate_account(account)?;
        self.store.redemptions(account).await
    }

    pub async fn earning(&self, key: &EarningKey) -> Result<Option<EarningTransaction>> {
        self.store.earning(key).await
    }

    /// Publish bucket definitions, then refresh the attached cache.
    pub async fn publish_definitions(&self, definitions: &[BucketDefinition]) -> Result<usize> {
        let written = self.store.upsert_bucket_definitions(definitions).await?;
        if let Some(cache) = &self.definitions {
            cache.refresh().await?;
        }
        Ok(written)
    }

    pub async fn reconcile_totals(&self) -> Result<Vec<TotalDrift>> {
        self.store.reconcile_totals().await
    }
}
