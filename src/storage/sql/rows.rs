//! Row types decoded by sqlx and their conversion into domain types.

use std::str::FromStr;

use uuid::Uuid;

use crate::error::StorageError;
use crate::ledger::allocation::Candidate;
use crate::ledger::ingest::StoredEarning;
use crate::ledger::model::{
    millis_to_datetime, parse_gaming_date, BucketBalance, BucketDefinition, EarningTransaction,
    RedemptionTransaction, TotalDrift,
};
use crate::storage::Result;

fn corrupt(table: &'static str, reason: impl Into<String>) -> StorageError {
    StorageError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn timestamp(
    table: &'static str,
    millis: i64,
) -> std::result::Result<chrono::DateTime<chrono::Utc>, StorageError> {
    millis_to_datetime(millis).ok_or_else(|| corrupt(table, format!("timestamp out of range: {millis}")))
}

fn gaming_date(table: &'static str, raw: &str) -> std::result::Result<chrono::NaiveDate, StorageError> {
    parse_gaming_date(raw).ok_or_else(|| corrupt(table, format!("bad gaming date: {raw}")))
}

#[derive(Debug, sqlx::FromRow)]
pub struct StoredEarningRow {
    pub account: String,
    pub earned: i64,
    pub is_void: bool,
}

impl From<StoredEarningRow> for StoredEarning {
    fn from(row: StoredEarningRow) -> Self {
        StoredEarning {
            account: row.account,
            earned: row.earned,
            is_void: row.is_void,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct EarningRow {
    pub transaction_id: String,
    pub category: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
    pub gaming_date: String,
    pub account: String,
    pub earned: i64,
    pub last_modified: i64,
    pub earning_rule_id: String,
    pub is_void: bool,
}

impl TryFrom<EarningRow> for EarningTransaction {
    type Error = StorageError;

    fn try_from(row: EarningRow) -> std::result::Result<Self, Self::Error> {
        const TABLE: &str = "earning_transactions";
        Ok(EarningTransaction {
            gaming_date: gaming_date(TABLE, &row.gaming_date)?,
            last_modified: timestamp(TABLE, row.last_modified)?,
            transaction_id: row.transaction_id,
            category: row.category,
            bucket_type: row.bucket_type,
            bucket_instance_id: row.bucket_instance_id,
            account: row.account,
            earned: row.earned,
            earning_rule_id: row.earning_rule_id,
            is_void: row.is_void,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BucketRow {
    pub account: String,
    pub bucket_type: String,
    pub bucket_instance_id: String,
    pub earned: i64,
    pub remaining: i64,
    pub last_modified: i64,
}

impl TryFrom<BucketRow> for BucketBalance {
    type Error = StorageError;

    fn try_from(row: BucketRow) -> std::result::Result<Self, Self::Error> {
        Ok(BucketBalance {
            last_modified: timestamp("bucket_balances", row.last_modified)?,
            account: row.account,
            bucket_type: row.bucket_type,
            bucket_instance_id: row.bucket_instance_id,
            earned: row.earned,
            remaining: row.remaining,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TotalRow {
    pub bucket_type: String,
    pub remaining: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct CandidateRow {
    pub bucket_instance_id: String,
    pub remaining: i64,
    pub expires_at: Option<i64>,
}

impl TryFrom<CandidateRow> for Candidate {
    type Error = StorageError;

    fn try_from(row: CandidateRow) -> std::result::Result<Self, Self::Error> {
        let expires_at = row
            .expires_at
            .map(|millis| timestamp("bucket_definitions", millis))
            .transpose()?;
        Ok(Candidate {
            bucket_instance_id: row.bucket_instance_id,
            expires_at,
            remaining: row.remaining,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RedemptionRow {
    pub redemption_id: String,
    pub account: String,
    pub bucket_type: String,
    pub gaming_date: String,
    pub redeemed: i64,
    pub source: String,
    pub detail: String,
    pub created_at: i64,
    pub is_void: bool,
}

impl TryFrom<RedemptionRow> for RedemptionTransaction {
    type Error = StorageError;

    fn try_from(row: RedemptionRow) -> std::result::Result<Self, Self::Error> {
        const TABLE: &str = "redemption_transactions";
        let redemption_id = Uuid::from_str(&row.redemption_id)
            .map_err(|e| corrupt(TABLE, format!("bad redemption id: {e}")))?;
        Ok(RedemptionTransaction {
            redemption_id,
            gaming_date: gaming_date(TABLE, &row.gaming_date)?,
            detail: serde_json::from_str(&row.detail)?,
            created_at: timestamp(TABLE, row.created_at)?,
            account: row.account,
            bucket_type: row.bucket_type,
            redeemed: row.redeemed,
            source: row.source,
            is_void: row.is_void,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DefinitionRow {
    pub bucket_instance_id: String,
    pub category: String,
    pub expires_at: Option<i64>,
    pub is_active: bool,
    pub is_latest: bool,
}

impl TryFrom<DefinitionRow> for BucketDefinition {
    type Error = StorageError;

    fn try_from(row: DefinitionRow) -> std::result::Result<Self, Self::Error> {
        let expires_at = row
            .expires_at
            .map(|millis| timestamp("bucket_definitions", millis))
            .transpose()?;
        Ok(BucketDefinition {
            bucket_instance_id: row.bucket_instance_id,
            category: row.category,
            expires_at,
            is_active: row.is_active,
            is_latest: row.is_latest,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DriftRow {
    pub account: String,
    pub bucket_type: String,
    pub cached: i64,
    pub actual: i64,
}

impl From<DriftRow> for TotalDrift {
    fn from(row: DriftRow) -> Self {
        TotalDrift {
            account: row.account,
            bucket_type: row.bucket_type,
            cached: row.cached,
            actual: row.actual,
        }
    }
}

/// Convert a batch of decoded rows, failing on the first corrupt one.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_gaming_date_is_reported() {
        let row = EarningRow {
            transaction_id: "t1".to_string(),
            category: "slot".to_string(),
            bucket_type: "point".to_string(),
            bucket_instance_id: "M1".to_string(),
            gaming_date: "yesterday".to_string(),
            account: "A".to_string(),
            earned: 1,
            last_modified: 0,
            earning_rule_id: "r1".to_string(),
            is_void: false,
        };
        let err = EarningTransaction::try_from(row).unwrap_err();
        assert!(matches!(err, StorageError::CorruptRow { table: "earning_transactions", .. }));
    }

    #[test]
    fn test_redemption_detail_decoded() {
        let row = RedemptionRow {
            redemption_id: Uuid::new_v4().to_string(),
            account: "A".to_string(),
            bucket_type: "point".to_string(),
            gaming_date: "2024-01-05".to_string(),
            redeemed: 7,
            source: "pos".to_string(),
            detail: r#"{"B1":5,"B2":2}"#.to_string(),
            created_at: 1_704_412_800_000,
            is_void: false,
        };
        let redemption = RedemptionTransaction::try_from(row).unwrap();
        assert_eq!(redemption.detail.get("B2"), Some(&2));
        assert_eq!(redemption.detail.values().sum::<i64>(), redemption.redeemed);
    }

    #[test]
    fn test_missing_expiry_means_never() {
        let row = CandidateRow {
            bucket_instance_id: "B1".to_string(),
            remaining: 3,
            expires_at: None,
        };
        assert_eq!(Candidate::try_from(row).unwrap().expires_at, None);
    }
}
