//! Time-windowed duplicate-request suppression.
//!
//! Best-effort protection against caller-side retries for requests that have
//! no stable natural key. A fingerprint is accepted once per window. The
//! table holds at most `max_entries` fingerprints: a full table first sweeps
//! expired entries, then evicts the oldest live ones. This guard is not a correctness mechanism: redemption
//! safety comes from row locks, and ingestion is idempotent through its
//! natural key.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::model::RedemptionRequest;
use crate::config::IdempotencyConfig;

/// SHA-256 over the semantically meaningful request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint an ordered list of fields.
    ///
    /// Fields are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Fingerprint of a redemption attempt.
    pub fn for_redemption(request: &RedemptionRequest) -> Self {
        let amount = request.amount.to_string();
        let gaming_date = request.gaming_date.to_string();
        Self::from_parts(&[
            "redemption",
            &request.account,
            &request.bucket_type,
            &amount,
            &gaming_date,
            &request.source,
        ])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Sliding-window de-duplication table.
pub struct IdempotencyGuard {
    window: Duration,
    max_entries: usize,
    seen: Mutex<HashMap<Fingerprint, Instant>>,
}

impl IdempotencyGuard {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &IdempotencyConfig) -> Self {
        Self::new(Duration::from_millis(config.window_ms), config.max_entries)
    }

    /// Record the fingerprint and report whether it is new.
    ///
    /// Returns `false` when the same fingerprint was accepted less than one
    /// window ago.
    pub async fn check_and_record(&self, fingerprint: Fingerprint) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;

        if let Some(at) = seen.get(&fingerprint) {
            if now.duration_since(*at) < self.window {
                return false;
            }
        }

        if seen.len() >= self.max_entries {
            let window = self.window;
            let before = seen.len();
            seen.retain(|_, at| now.duration_since(*at) < window);
            debug!(
                evicted = before - seen.len(),
                remaining = seen.len(),
                "Idempotency table swept"
            );
        }

        // Still full: every entry is live, so the oldest ones make room.
        while seen.len() >= self.max_entries {
            let oldest = seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(fingerprint, _)| *fingerprint);
            match oldest {
                Some(oldest) => {
                    seen.remove(&oldest);
                    debug!(fingerprint = %oldest.to_hex(), "Evicted live idempotency entry");
                }
                None => break,
            }
        }

        seen.insert(fingerprint, now);
        true
    }

    /// Forget a fingerprint so an identical request is accepted again.
    ///
    /// Called when the guarded operation failed.
    pub async fn release(&self, fingerprint: &Fingerprint) {
        self.seen.lock().await.remove(fingerprint);
    }

    /// Number of tracked fingerprints, expired ones included.
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}
