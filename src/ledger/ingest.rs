//! Earning batch planning.
//!
//! Turns a sub-batch of earning records plus the stored state of any
//! colliding log rows into the writes a store must apply inside one
//! transaction. Planning is pure so every backend shares the same
//! correction and aggregation semantics:
//!
//! - Duplicate identity keys inside one batch collapse to the last occurrence.
//! - A new log row contributes its effective amount (zero when voided).
//! - A colliding log row is a correction. Only gaming date, earned amount and
//!   last-modified change; account, rule and void flag keep their stored
//!   values. The balance delta is `new earned - stored earned`, or zero for a
//!   voided row, so an identical replay changes no balance.
//! - Deltas are summed per bucket and per (account, bucket type) before any
//!   write. Summation is commutative, so record order inside a batch does not
//!   matter.
//!
//! All maps are `BTreeMap`s: iterating them yields keys in the global lock
//! order that stores must follow.

use std::collections::{BTreeMap, HashMap};

use super::model::{BatchOutcome, BucketKey, EarningKey, EarningTransaction, TotalKey};
use super::validation::{errmsg, ValidationError};

/// Stored state of a log row that an incoming record collides with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEarning {
    pub account: String,
    pub earned: i64,
    pub is_void: bool,
}

/// One log row to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogWrite {
    Insert(EarningTransaction),
    /// Correct the mutable fields of an existing row.
    Correct(EarningTransaction),
}

impl LogWrite {
    pub fn record(&self) -> &EarningTransaction {
        match self {
            LogWrite::Insert(record) | LogWrite::Correct(record) => record,
        }
    }
}

/// Everything a store writes for one sub-batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Log writes in identity-key order.
    pub log_writes: Vec<LogWrite>,
    /// Summed delta per bucket, in bucket-key order.
    pub bucket_deltas: BTreeMap<BucketKey, i64>,
    /// Summed delta per account total, in key order.
    pub total_deltas: BTreeMap<TotalKey, i64>,
}

impl BatchPlan {
    pub fn corrections(&self) -> usize {
        self.log_writes
            .iter()
            .filter(|w| matches!(w, LogWrite::Correct(_)))
            .count()
    }

    pub fn outcome(&self) -> BatchOutcome {
        BatchOutcome {
            applied: self.log_writes.len(),
            corrected: self.corrections(),
            buckets_touched: self.bucket_deltas.len(),
        }
    }
}

/// Rejection for a correction that would leave a balance below zero.
pub fn correction_underflow(target: &str, remaining: i64) -> ValidationError {
    ValidationError::new(
        "earned",
        format!(
            "{} ({target} would be {remaining})",
            errmsg::CORRECTION_UNDERFLOW
        ),
    )
}

/// Add `delta` to the entry for `key`, rejecting a sum outside the i64 range.
fn accumulate<K: Ord>(
    deltas: &mut BTreeMap<K, i64>,
    key: K,
    delta: i64,
) -> Result<(), ValidationError> {
    let entry = deltas.entry(key).or_insert(0);
    *entry = entry
        .checked_add(delta)
        .ok_or_else(|| ValidationError::new("earned", errmsg::AMOUNT_OVERFLOW))?;
    Ok(())
}

/// Collapse records sharing an identity key, keeping the last occurrence.
///
/// The result is ordered by identity key.
pub fn dedupe_last_wins(records: &[EarningTransaction]) -> BTreeMap<EarningKey, EarningTransaction> {
    let mut unique = BTreeMap::new();
    for record in records {
        unique.insert(record.key(), record.clone());
    }
    unique
}

/// Build the write plan for a deduplicated batch.
///
/// `stored` holds the existing log rows for any keys that already exist.
/// Fails when a summed delta leaves the i64 range.
pub fn plan_batch(
    records: BTreeMap<EarningKey, EarningTransaction>,
    stored: &HashMap<EarningKey, StoredEarning>,
) -> Result<BatchPlan, ValidationError> {
    let mut plan = BatchPlan::default();

    for (key, record) in records {
        match stored.get(&key) {
            None => {
                // First sighting creates the bucket and total rows even for a
                // zero amount.
                let delta = record.effective_amount();
                let bucket = record.bucket_key();
                accumulate(&mut plan.total_deltas, bucket.total_key(), delta)?;
                accumulate(&mut plan.bucket_deltas, bucket, delta)?;
                plan.log_writes.push(LogWrite::Insert(record));
            }
            Some(previous) => {
                let delta = if previous.is_void {
                    0
                } else {
                    record.earned - previous.earned
                };
                if delta != 0 {
                    let bucket = BucketKey {
                        account: previous.account.clone(),
                        bucket_type: key.bucket_type.clone(),
                        bucket_instance_id: key.bucket_instance_id.clone(),
                    };
                    accumulate(&mut plan.total_deltas, bucket.total_key(), delta)?;
                    accumulate(&mut plan.bucket_deltas, bucket, delta)?;
                }
                plan.log_writes.push(LogWrite::Correct(record));
            }
        }
    }

    Ok(plan)
}
