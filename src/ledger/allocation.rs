//! FIFO-expiry allocation over an ordered snapshot of locked buckets.
//!
//! Stores fetch and lock every candidate bucket once, hand the snapshot to
//! [`allocate`], and flush the resulting deductions in the same transaction.
//! Allocation itself never touches storage.
//!
//! Ordering: ascending expiry, never-expiring buckets last, ties broken by
//! bucket instance id so the same snapshot always yields the same split.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{RedemptionDetail, RedemptionRequest, RedemptionTransaction};
use crate::error::LedgerError;

/// A locked bucket eligible for redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub bucket_instance_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining: i64,
}

/// One bucket's share of a redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub bucket_instance_id: String,
    pub amount: i64,
    /// Remaining balance the bucket had when it was locked.
    pub remaining_before: i64,
}

impl Deduction {
    pub fn remaining_after(&self) -> i64 {
        self.remaining_before - self.amount
    }
}

/// Result of a covered allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Deductions in consumption order. Every amount is positive.
    pub deductions: Vec<Deduction>,
    pub total: i64,
}

impl Allocation {
    /// Bucket instance id → amount deducted.
    pub fn detail(&self) -> RedemptionDetail {
        self.deductions
            .iter()
            .map(|d| (d.bucket_instance_id.clone(), d.amount))
            .collect()
    }

    /// The log entry recording this allocation.
    pub fn to_redemption(
        &self,
        request: &RedemptionRequest,
        created_at: DateTime<Utc>,
    ) -> RedemptionTransaction {
        RedemptionTransaction {
            redemption_id: Uuid::new_v4(),
            account: request.account.clone(),
            bucket_type: request.bucket_type.clone(),
            gaming_date: request.gaming_date,
            redeemed: self.total,
            source: request.source.clone(),
            detail: self.detail(),
            created_at,
            is_void: false,
        }
    }
}

/// The snapshot does not cover the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: i64,
    pub available: i64,
}

impl Shortfall {
    pub fn into_error(self, request: &RedemptionRequest) -> LedgerError {
        LedgerError::InsufficientBalance {
            account: request.account.clone(),
            bucket_type: request.bucket_type.clone(),
            requested: self.requested,
            available: self.available,
        }
    }
}

/// Sort candidates into consumption order.
pub fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        (a.expires_at.is_none(), a.expires_at, &a.bucket_instance_id).cmp(&(
            b.expires_at.is_none(),
            b.expires_at,
            &b.bucket_instance_id,
        ))
    });
}

/// Allocate `requested` across the candidates, earliest expiry first.
///
/// Returns [`Shortfall`] without producing any deduction when the summed
/// remaining balance is below the request.
pub fn allocate(mut candidates: Vec<Candidate>, requested: i64) -> Result<Allocation, Shortfall> {
    candidates.retain(|c| c.remaining > 0);
    order_candidates(&mut candidates);

    let available = candidates
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.remaining));
    if available < requested {
        return Err(Shortfall {
            requested,
            available,
        });
    }

    let mut left = requested;
    let mut deductions = Vec::new();
    for candidate in candidates {
        if left == 0 {
            break;
        }
        let amount = candidate.remaining.min(left);
        left -= amount;
        deductions.push(Deduction {
            bucket_instance_id: candidate.bucket_instance_id,
            amount,
            remaining_before: candidate.remaining,
        });
    }

    Ok(Allocation {
        deductions,
        total: requested,
    })
}
