//! Ledger domain types.
//!
//! Amounts are `i64` in the bucket type's smallest unit (points, cents).
//! Timestamps are carried as `DateTime<Utc>` and persisted as epoch
//! milliseconds; gaming dates are calendar dates persisted as `YYYY-MM-DD`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an earning log row.
///
/// Ordering is lexicographic on the fields, which gives ingestion its global
/// lock order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EarningKey {
    pub transaction_id: String,
    pub category: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
}

/// Append-only earning log entry, as produced by the upstream rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningTransaction {
    pub transaction_id: String,
    pub category: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
    pub gaming_date: NaiveDate,
    pub account: String,
    pub earned: i64,
    pub last_modified: DateTime<Utc>,
    pub earning_rule_id: String,
    #[serde(default)]
    pub is_void: bool,
}

impl EarningTransaction {
    pub fn key(&self) -> EarningKey {
        EarningKey {
            transaction_id: self.transaction_id.clone(),
            category: self.category.clone(),
            bucket_type: self.bucket_type.clone(),
            bucket_instance_id: self.bucket_instance_id.clone(),
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            account: self.account.clone(),
            bucket_type: self.bucket_type.clone(),
            bucket_instance_id: self.bucket_instance_id.clone(),
        }
    }

    /// Amount this row contributes to balances. Voided rows contribute nothing.
    pub fn effective_amount(&self) -> i64 {
        if self.is_void {
            0
        } else {
            self.earned
        }
    }
}

/// Identity of a bucket balance row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub account: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
}

impl BucketKey {
    pub fn total_key(&self) -> TotalKey {
        TotalKey {
            account: self.account.clone(),
            bucket_type: self.bucket_type.clone(),
        }
    }
}

/// Identity of an account total row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TotalKey {
    pub account: String,
    pub bucket_type: String,
}

/// Per-bucket balance. Rows are never deleted, so exhausted buckets remain
/// as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketBalance {
    pub account: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
    pub earned: i64,
    pub remaining: i64,
    pub last_modified: DateTime<Utc>,
}

impl BucketBalance {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Account-level cache: bucket type → remaining.
pub type AccountTotals = BTreeMap<String, i64>;

/// Bucket instance id → amount deducted from that bucket.
pub type RedemptionDetail = BTreeMap<String, i64>;

/// A request to redeem value from an account's buckets of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub account: String,
    pub bucket_type: String,
    pub gaming_date: NaiveDate,
    pub amount: i64,
    pub source: String,
}

/// Immutable redemption log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionTransaction {
    pub redemption_id: Uuid,
    pub account: String,
    pub bucket_type: String,
    pub gaming_date: NaiveDate,
    pub redeemed: i64,
    pub source: String,
    pub detail: RedemptionDetail,
    pub created_at: DateTime<Utc>,
    pub is_void: bool,
}

impl RedemptionTransaction {
    pub fn receipt(&self) -> RedemptionReceipt {
        RedemptionReceipt {
            redemption_id: self.redemption_id,
            detail: self.detail.clone(),
            redeemed: self.redeemed,
            redeemed_at: self.created_at,
        }
    }
}

/// What a successful redemption hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    pub redemption_id: Uuid,
    pub detail: RedemptionDetail,
    pub redeemed: i64,
    pub redeemed_at: DateTime<Utc>,
}

/// External reference data describing a bucket instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDefinition {
    pub bucket_instance_id: String,
    pub category: String,
    /// `None` means the bucket never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_latest: bool,
}

/// Summary of one applied ingestion sub-batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Log rows written (inserted or corrected).
    pub applied: usize,
    /// Rows whose identity key already existed.
    pub corrected: usize,
    /// Bucket rows created or adjusted.
    pub buckets_touched: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.applied += other.applied;
        self.corrected += other.corrected;
        self.buckets_touched += other.buckets_touched;
    }
}

/// A cached total that disagrees with the sum of its bucket rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalDrift {
    pub account: String,
    pub bucket_type: String,
    pub cached: i64,
    pub actual: i64,
}

/// Current time at the precision the stores persist.
pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

pub(crate) const GAMING_DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_gaming_date(date: NaiveDate) -> String {
    date.format(GAMING_DATE_FORMAT).to_string()
}

pub(crate) fn parse_gaming_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, GAMING_DATE_FORMAT).ok()
}
