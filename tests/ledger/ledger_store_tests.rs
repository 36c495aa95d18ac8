//! LedgerStore interface tests.
//!
//! These tests verify the contract of the LedgerStore trait.
//! Each storage implementation should run these tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use bucket_ledger::ledger::model::{
    BucketDefinition, EarningTransaction, RedemptionDetail, RedemptionRequest,
};
use bucket_ledger::reference::BucketDefinitionSource;
use bucket_ledger::storage::LedgerStore;
use bucket_ledger::LedgerError;

pub fn gaming_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
}

/// An earning of `earned` points from transaction `tx` into `bucket`.
pub fn earning(tx: &str, account: &str, bucket: &str, earned: i64) -> EarningTransaction {
    EarningTransaction {
        transaction_id: tx.to_string(),
        category: "slot".to_string(),
        bucket_type: "point".to_string(),
        bucket_instance_id: bucket.to_string(),
        gaming_date: gaming_date(),
        account: account.to_string(),
        earned,
        last_modified: Utc::now(),
        earning_rule_id: "rule-1".to_string(),
        is_void: false,
    }
}

pub fn redemption(account: &str, amount: i64) -> RedemptionRequest {
    RedemptionRequest {
        account: account.to_string(),
        bucket_type: "point".to_string(),
        gaming_date: gaming_date(),
        amount,
        source: "kiosk".to_string(),
    }
}

pub fn expiring(bucket: &str, expires_at: Option<DateTime<Utc>>) -> BucketDefinition {
    BucketDefinition {
        bucket_instance_id: bucket.to_string(),
        category: "slot".to_string(),
        expires_at,
        is_active: true,
        is_latest: true,
    }
}

fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 0, 0, 0).unwrap()
}

fn detail(entries: &[(&str, i64)]) -> RedemptionDetail {
    entries
        .iter()
        .map(|(bucket, amount)| (bucket.to_string(), *amount))
        .collect()
}

async fn total<S: LedgerStore>(store: &S, account: &str) -> Option<i64> {
    store
        .account_totals(account)
        .await
        .expect("account_totals should succeed")
        .get("point")
        .copied()
}

// =============================================================================
// Ingestion
// =============================================================================

pub async fn test_ingest_creates_bucket_and_total<S: LedgerStore>(store: &S) {
    let account = "test_ingest_creates";

    let outcome = store
        .apply_earning_batch(&[earning("t1", account, "M1", 10)])
        .await
        .expect("ingest should succeed");
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.corrected, 0);
    assert_eq!(outcome.buckets_touched, 1);

    assert_eq!(total(store, account).await, Some(10));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].bucket_instance_id, "M1");
    assert_eq!(buckets[0].earned, 10);
    assert_eq!(buckets[0].remaining, 10);
}

pub async fn test_ingest_accumulates_into_bucket<S: LedgerStore>(store: &S) {
    let account = "test_ingest_accumulates";

    store
        .apply_earning_batch(&[earning("t1", account, "M1", 10), earning("t2", account, "M1", 5)])
        .await
        .unwrap();
    store
        .apply_earning_batch(&[earning("t3", account, "M2", 1)])
        .await
        .unwrap();

    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].earned, 15);
    assert_eq!(buckets[0].remaining, 15);
    assert_eq!(total(store, account).await, Some(16));
}

pub async fn test_ingest_empty_batch<S: LedgerStore>(store: &S) {
    let outcome = store.apply_earning_batch(&[]).await.unwrap();
    assert_eq!(outcome.applied, 0);
}

pub async fn test_replay_leaves_balances_unchanged<S: LedgerStore>(store: &S) {
    let account = "test_replay";
    let record = earning("t1", account, "M1", 10);

    store.apply_earning_batch(&[record.clone()]).await.unwrap();
    let outcome = store.apply_earning_batch(&[record.clone()]).await.unwrap();

    assert_eq!(outcome.corrected, 1);
    assert_eq!(total(store, account).await, Some(10));
    let stored = store.earning(&record.key()).await.unwrap().expect("row should exist");
    assert_eq!(stored.earned, 10);
}

pub async fn test_correction_applies_difference<S: LedgerStore>(store: &S) {
    let account = "test_correction";
    let mut record = earning("t1", account, "M1", 10);
    store.apply_earning_batch(&[record.clone()]).await.unwrap();

    record.earned = 7;
    store.apply_earning_batch(&[record.clone()]).await.unwrap();

    assert_eq!(total(store, account).await, Some(7));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets[0].earned, 7);
    assert_eq!(buckets[0].remaining, 7);
    let stored = store.earning(&record.key()).await.unwrap().unwrap();
    assert_eq!(stored.earned, 7);
}

pub async fn test_voided_record_contributes_nothing<S: LedgerStore>(store: &S) {
    let account = "test_void";
    let mut record = earning("t1", account, "M1", 10);
    record.is_void = true;
    store.apply_earning_batch(&[record.clone()]).await.unwrap();

    // A correction of a voided row keeps the void flag.
    record.earned = 25;
    record.is_void = false;
    store.apply_earning_batch(&[record.clone()]).await.unwrap();

    assert_eq!(total(store, account).await, Some(0));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].remaining, 0);
    let stored = store.earning(&record.key()).await.unwrap().unwrap();
    assert!(stored.is_void);
    assert_eq!(stored.earned, 25);
}

pub async fn test_duplicate_keys_in_batch_last_wins<S: LedgerStore>(store: &S) {
    let account = "test_in_batch_dupes";

    let outcome = store
        .apply_earning_batch(&[earning("t1", account, "M1", 4), earning("t1", account, "M1", 6)])
        .await
        .unwrap();

    assert_eq!(outcome.applied, 1);
    assert_eq!(total(store, account).await, Some(6));
}

pub async fn test_correction_underflow_rolls_back_batch<S: LedgerStore>(store: &S) {
    let account = "test_underflow";
    let mut record = earning("t1", account, "M1", 10);
    store.apply_earning_batch(&[record.clone()]).await.unwrap();
    store.redeem(&redemption(account, 8)).await.unwrap();

    record.earned = 1;
    let err = store
        .apply_earning_batch(&[earning("t2", account, "M2", 5), record.clone()])
        .await
        .expect_err("correction below redeemed value should fail");
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");

    assert_eq!(total(store, account).await, Some(2));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets.len(), 1, "new bucket from the failed batch must not exist");
    let stored = store.earning(&record.key()).await.unwrap().unwrap();
    assert_eq!(stored.earned, 10);
}

pub async fn test_overflowing_batch_is_rejected<S: LedgerStore>(store: &S) {
    let account = "test_overflow";
    let half = i64::MAX / 2 + 1;

    let err = store
        .apply_earning_batch(&[earning("t1", account, "M1", half), earning("t2", account, "M1", half)])
        .await
        .expect_err("summed earnings past i64::MAX should fail");
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");

    assert_eq!(total(store, account).await, None);
    assert!(store.earning(&earning("t1", account, "M1", 0).key()).await.unwrap().is_none());
}

// =============================================================================
// Redemption
// =============================================================================

pub async fn test_redeem_single_bucket<S: LedgerStore>(store: &S) {
    let account = "test_redeem_single";
    store
        .apply_earning_batch(&[earning("t1", account, "M1", 10)])
        .await
        .unwrap();

    let receipt = store.redeem(&redemption(account, 4)).await.unwrap();

    assert_eq!(receipt.redeemed, 4);
    assert_eq!(receipt.detail, detail(&[("M1", 4)]));
    assert_eq!(total(store, account).await, Some(6));

    let log = store.redemptions(account).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].redemption_id, receipt.redemption_id);
    assert_eq!(log[0].detail, receipt.detail);
    assert_eq!(log[0].source, "kiosk");
}

pub async fn test_redeem_earliest_expiry_first<S: LedgerStore>(store: &S) {
    let account = "test_redeem_fifo";
    store
        .upsert_bucket_definitions(&[
            expiring("fifo_B2", Some(day(2024, 3, 1))),
            expiring("fifo_B1", Some(day(2024, 2, 1))),
        ])
        .await
        .unwrap();
    store
        .apply_earning_batch(&[
            earning("t1", account, "fifo_B2", 10),
            earning("t2", account, "fifo_B1", 5),
        ])
        .await
        .unwrap();

    let receipt = store.redeem(&redemption(account, 7)).await.unwrap();

    assert_eq!(receipt.detail, detail(&[("fifo_B1", 5), ("fifo_B2", 2)]));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets[0].bucket_instance_id, "fifo_B1");
    assert_eq!(buckets[0].remaining, 0);
    assert_eq!(buckets[1].remaining, 8);
    assert_eq!(total(store, account).await, Some(8));
}

pub async fn test_redeem_equal_expiry_breaks_tie_on_instance_id<S: LedgerStore>(store: &S) {
    let account = "test_redeem_tie";
    let expiry = Some(day(2024, 6, 1));
    store
        .upsert_bucket_definitions(&[expiring("tie_X2", expiry), expiring("tie_X1", expiry)])
        .await
        .unwrap();
    store
        .apply_earning_batch(&[
            earning("t1", account, "tie_X2", 5),
            earning("t2", account, "tie_X1", 5),
        ])
        .await
        .unwrap();

    let receipt = store.redeem(&redemption(account, 3)).await.unwrap();
    assert_eq!(receipt.detail, detail(&[("tie_X1", 3)]));
}

pub async fn test_redeem_undated_bucket_last<S: LedgerStore>(store: &S) {
    let account = "test_redeem_undated";
    store
        .upsert_bucket_definitions(&[expiring("undated_D1", Some(day(2030, 1, 1)))])
        .await
        .unwrap();
    store
        .apply_earning_batch(&[
            earning("t1", account, "undated_A0", 5),
            earning("t2", account, "undated_D1", 5),
        ])
        .await
        .unwrap();

    let receipt = store.redeem(&redemption(account, 6)).await.unwrap();
    assert_eq!(receipt.detail, detail(&[("undated_A0", 1), ("undated_D1", 5)]));
}

pub async fn test_insufficient_balance_writes_nothing<S: LedgerStore>(store: &S) {
    let account = "test_insufficient";
    store
        .apply_earning_batch(&[earning("t1", account, "M1", 2), earning("t2", account, "M2", 1)])
        .await
        .unwrap();

    let err = store
        .redeem(&redemption(account, 5))
        .await
        .expect_err("redeem should fail");
    match err {
        LedgerError::InsufficientBalance {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 5);
            assert_eq!(available, 3);
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }

    assert_eq!(total(store, account).await, Some(3));
    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert!(buckets.iter().all(|b| b.remaining == b.earned));
    assert!(store.redemptions(account).await.unwrap().is_empty());
}

pub async fn test_exhausted_buckets_remain<S: LedgerStore>(store: &S) {
    let account = "test_exhausted";
    store
        .apply_earning_batch(&[earning("t1", account, "M1", 4)])
        .await
        .unwrap();

    store.redeem(&redemption(account, 4)).await.unwrap();

    let buckets = store.bucket_balances(account, "point").await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert!(buckets[0].is_exhausted());
    assert_eq!(buckets[0].earned, 4);
    assert_eq!(total(store, account).await, Some(0));

    let err = store.redeem(&redemption(account, 1)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance { available: 0, .. }
    ));
}

pub async fn test_redemptions_newest_first<S: LedgerStore>(store: &S) {
    let account = "test_redemption_order";
    store
        .apply_earning_batch(&[earning("t1", account, "M1", 10)])
        .await
        .unwrap();

    let first = store.redeem(&redemption(account, 1)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store.redeem(&redemption(account, 2)).await.unwrap();

    let log = store.redemptions(account).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].redemption_id, second.redemption_id);
    assert_eq!(log[1].redemption_id, first.redemption_id);
}

// =============================================================================
// Aggregates
// =============================================================================

pub async fn test_totals_per_bucket_type<S: LedgerStore>(store: &S) {
    let account = "test_totals_types";
    let mut comp = earning("t2", account, "C1", 250);
    comp.bucket_type = "comp".to_string();

    store
        .apply_earning_batch(&[earning("t1", account, "M1", 10), comp])
        .await
        .unwrap();

    let totals = store.account_totals(account).await.unwrap();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals.get("point"), Some(&10));
    assert_eq!(totals.get("comp"), Some(&250));
}

pub async fn test_unknown_account_has_no_totals<S: LedgerStore>(store: &S) {
    let totals = store.account_totals("test_nobody").await.unwrap();
    assert!(totals.is_empty());
}

pub async fn test_totals_match_buckets<S: LedgerStore>(store: &S) {
    let account = "test_reconcile";
    store
        .apply_earning_batch(&[
            earning("t1", account, "M1", 10),
            earning("t2", account, "M2", 7),
        ])
        .await
        .unwrap();
    store.redeem(&redemption(account, 12)).await.unwrap();
    let mut corrected = earning("t2", account, "M2", 9);
    corrected.last_modified = Utc::now();
    store.apply_earning_batch(&[corrected]).await.unwrap();

    let buckets = store.bucket_balances(account, "point").await.unwrap();
    let sum: i64 = buckets.iter().map(|b| b.remaining).sum();
    assert_eq!(total(store, account).await, Some(sum));

    let drift = store.reconcile_totals().await.unwrap();
    assert!(
        drift.iter().all(|d| d.account != account),
        "unexpected drift: {drift:?}"
    );
}

// =============================================================================
// Reference data
// =============================================================================

pub async fn test_definitions_publish_and_load<S: LedgerStore + BucketDefinitionSource>(store: &S) {
    let mut definition = expiring("ref_R1", Some(day(2025, 1, 1)));
    store
        .upsert_bucket_definitions(&[definition.clone()])
        .await
        .unwrap();

    definition.is_active = false;
    let written = store
        .upsert_bucket_definitions(&[definition.clone()])
        .await
        .unwrap();
    assert_eq!(written, 1);

    let fetched = store
        .fetch_definition("ref_R1")
        .await
        .unwrap()
        .expect("definition should exist");
    assert_eq!(fetched, definition);

    let all = store.load_definitions().await.unwrap();
    assert!(all.iter().any(|d| d.bucket_instance_id == "ref_R1"));
    assert!(store.fetch_definition("ref_missing").await.unwrap().is_none());
}

/// Run all LedgerStore tests against a store implementation.
#[macro_export]
macro_rules! run_ledger_store_tests {
    ($store:expr) => {
        use $crate::ledger::ledger_store_tests::*;

        // ingestion
        test_ingest_creates_bucket_and_total($store).await;
        println!("  test_ingest_creates_bucket_and_total: PASSED");

        test_ingest_accumulates_into_bucket($store).await;
        println!("  test_ingest_accumulates_into_bucket: PASSED");

        test_ingest_empty_batch($store).await;
        println!("  test_ingest_empty_batch: PASSED");

        test_replay_leaves_balances_unchanged($store).await;
        println!("  test_replay_leaves_balances_unchanged: PASSED");

        test_correction_applies_difference($store).await;
        println!("  test_correction_applies_difference: PASSED");

        test_voided_record_contributes_nothing($store).await;
        println!("  test_voided_record_contributes_nothing: PASSED");

        test_duplicate_keys_in_batch_last_wins($store).await;
        println!("  test_duplicate_keys_in_batch_last_wins: PASSED");

        test_correction_underflow_rolls_back_batch($store).await;
        println!("  test_correction_underflow_rolls_back_batch: PASSED");

        test_overflowing_batch_is_rejected($store).await;
        println!("  test_overflowing_batch_is_rejected: PASSED");

        // redemption
        test_redeem_single_bucket($store).await;
        println!("  test_redeem_single_bucket: PASSED");

        test_redeem_earliest_expiry_first($store).await;
        println!("  test_redeem_earliest_expiry_first: PASSED");

        test_redeem_equal_expiry_breaks_tie_on_instance_id($store).await;
        println!("  test_redeem_equal_expiry_breaks_tie_on_instance_id: PASSED");

        test_redeem_undated_bucket_last($store).await;
        println!("  test_redeem_undated_bucket_last: PASSED");

        test_insufficient_balance_writes_nothing($store).await;
        println!("  test_insufficient_balance_writes_nothing: PASSED");

        test_exhausted_buckets_remain($store).await;
        println!("  test_exhausted_buckets_remain: PASSED");

        test_redemptions_newest_first($store).await;
        println!("  test_redemptions_newest_first: PASSED");

        // aggregates
        test_totals_per_bucket_type($store).await;
        println!("  test_totals_per_bucket_type: PASSED");

        test_unknown_account_has_no_totals($store).await;
        println!("  test_unknown_account_has_no_totals: PASSED");

        test_totals_match_buckets($store).await;
        println!("  test_totals_match_buckets: PASSED");

        // reference data
        test_definitions_publish_and_load($store).await;
        println!("  test_definitions_publish_and_load: PASSED");
    };
}
