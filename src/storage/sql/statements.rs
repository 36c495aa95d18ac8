//! Backend-neutral ledger statements.
//!
//! Every function returns an unrendered sea-query statement; stores render it
//! with their `SqlDatabase` marker and add backend-only clauses (row locks)
//! where needed. Balance upserts qualify columns with the table name because
//! PostgreSQL treats bare names in `ON CONFLICT DO UPDATE` as ambiguous.

use sea_query::{
    Cond, Condition, DeleteStatement, Expr, InsertStatement, IntoColumnRef, IntoTableRef,
    OnConflict, Order, Query, SelectStatement, UpdateStatement,
};

use crate::ledger::allocation::Deduction;
use crate::ledger::model::{
    format_gaming_date, BucketDefinition, BucketKey, EarningKey, EarningTransaction,
    RedemptionTransaction, TotalKey,
};
use crate::storage::schema::{
    AccountTotalBalances, BucketBalances, BucketDefinitions, EarningTransactions,
    RedemptionTransactions,
};
use crate::storage::Result;

/// Totals whose cached value disagrees with the sum of their buckets.
///
/// `SUM` over `BIGINT` yields `NUMERIC` in PostgreSQL, hence the casts.
pub const RECONCILE_TOTALS: &str = r#"
SELECT t.account AS account,
       t.bucket_type AS bucket_type,
       t.remaining AS cached,
       CAST(COALESCE(SUM(b.remaining), 0) AS BIGINT) AS actual
FROM account_total_balances t
LEFT JOIN bucket_balances b
    ON b.account = t.account AND b.bucket_type = t.bucket_type
GROUP BY t.account, t.bucket_type, t.remaining
HAVING t.remaining <> CAST(COALESCE(SUM(b.remaining), 0) AS BIGINT)
ORDER BY t.account, t.bucket_type
"#;

fn earning_key_cond(key: &EarningKey) -> Condition {
    Cond::all()
        .add(Expr::col(EarningTransactions::TransactionId).eq(&key.transaction_id))
        .add(Expr::col(EarningTransactions::Category).eq(&key.category))
        .add(Expr::col(EarningTransactions::BucketType).eq(&key.bucket_type))
        .add(Expr::col(EarningTransactions::BucketInstanceId).eq(&key.bucket_instance_id))
}

// ============================================================================
// Earning log
// ============================================================================

/// The fields of a stored log row that correction planning needs.
pub fn select_stored_earning(key: &EarningKey) -> SelectStatement {
    Query::select()
        .columns([
            EarningTransactions::Account,
            EarningTransactions::Earned,
            EarningTransactions::IsVoid,
        ])
        .from(EarningTransactions::Table)
        .cond_where(earning_key_cond(key))
        .limit(1)
        .to_owned()
}

pub fn select_earning(key: &EarningKey) -> SelectStatement {
    Query::select()
        .columns([
            EarningTransactions::TransactionId,
            EarningTransactions::Category,
            EarningTransactions::BucketType,
            EarningTransactions::BucketInstanceId,
            EarningTransactions::GamingDate,
            EarningTransactions::Account,
            EarningTransactions::Earned,
            EarningTransactions::LastModified,
            EarningTransactions::EarningRuleId,
            EarningTransactions::IsVoid,
        ])
        .from(EarningTransactions::Table)
        .cond_where(earning_key_cond(key))
        .limit(1)
        .to_owned()
}

pub fn insert_earning(record: &EarningTransaction, created_at: i64) -> InsertStatement {
    Query::insert()
        .into_table(EarningTransactions::Table)
        .columns([
            EarningTransactions::TransactionId,
            EarningTransactions::Category,
            EarningTransactions::BucketType,
            EarningTransactions::BucketInstanceId,
            EarningTransactions::GamingDate,
            EarningTransactions::Account,
            EarningTransactions::Earned,
            EarningTransactions::LastModified,
            EarningTransactions::EarningRuleId,
            EarningTransactions::IsVoid,
            EarningTransactions::CreatedAt,
        ])
        .values_panic([
            record.transaction_id.as_str().into(),
            record.category.as_str().into(),
            record.bucket_type.as_str().into(),
            record.bucket_instance_id.as_str().into(),
            format_gaming_date(record.gaming_date).into(),
            record.account.as_str().into(),
            record.earned.into(),
            record.last_modified.timestamp_millis().into(),
            record.earning_rule_id.as_str().into(),
            record.is_void.into(),
            created_at.into(),
        ])
        .to_owned()
}

/// Overwrite the mutable fields of an existing log row.
pub fn correct_earning(record: &EarningTransaction) -> UpdateStatement {
    Query::update()
        .table(EarningTransactions::Table)
        .value(
            EarningTransactions::GamingDate,
            format_gaming_date(record.gaming_date),
        )
        .value(EarningTransactions::Earned, record.earned)
        .value(
            EarningTransactions::LastModified,
            record.last_modified.timestamp_millis(),
        )
        .cond_where(earning_key_cond(&record.key()))
        .to_owned()
}

// ============================================================================
// Balances
// ============================================================================

/// Create or adjust a bucket row, returning its new remaining balance.
pub fn upsert_bucket(key: &BucketKey, delta: i64, now: i64) -> InsertStatement {
    Query::insert()
        .into_table(BucketBalances::Table)
        .columns([
            BucketBalances::Account,
            BucketBalances::BucketType,
            BucketBalances::BucketInstanceId,
            BucketBalances::Earned,
            BucketBalances::Remaining,
            BucketBalances::LastModified,
        ])
        .values_panic([
            key.account.as_str().into(),
            key.bucket_type.as_str().into(),
            key.bucket_instance_id.as_str().into(),
            delta.into(),
            delta.into(),
            now.into(),
        ])
        .on_conflict(
            OnConflict::columns([
                BucketBalances::Account,
                BucketBalances::BucketType,
                BucketBalances::BucketInstanceId,
            ])
            .value(
                BucketBalances::Earned,
                Expr::col((BucketBalances::Table, BucketBalances::Earned)).add(delta),
            )
            .value(
                BucketBalances::Remaining,
                Expr::col((BucketBalances::Table, BucketBalances::Remaining)).add(delta),
            )
            .update_column(BucketBalances::LastModified)
            .to_owned(),
        )
        .returning_col(BucketBalances::Remaining)
        .to_owned()
}

/// Create or adjust an account total, returning its new remaining balance.
pub fn upsert_total(key: &TotalKey, delta: i64, now: i64) -> InsertStatement {
    Query::insert()
        .into_table(AccountTotalBalances::Table)
        .columns([
            AccountTotalBalances::Account,
            AccountTotalBalances::BucketType,
            AccountTotalBalances::Remaining,
            AccountTotalBalances::LastModified,
        ])
        .values_panic([
            key.account.as_str().into(),
            key.bucket_type.as_str().into(),
            delta.into(),
            now.into(),
        ])
        .on_conflict(
            OnConflict::columns([AccountTotalBalances::Account, AccountTotalBalances::BucketType])
                .value(
                    AccountTotalBalances::Remaining,
                    Expr::col((AccountTotalBalances::Table, AccountTotalBalances::Remaining))
                        .add(delta),
                )
                .update_column(AccountTotalBalances::LastModified)
                .to_owned(),
        )
        .returning_col(AccountTotalBalances::Remaining)
        .to_owned()
}

/// Buckets of one account and type with value left, joined with their
/// expiry, in bucket instance id order.
///
/// The id order is the lock order when a backend adds a row lock.
pub fn select_candidates(account: &str, bucket_type: &str) -> SelectStatement {
    Query::select()
        .column((BucketBalances::Table, BucketBalances::BucketInstanceId))
        .column((BucketBalances::Table, BucketBalances::Remaining))
        .column((BucketDefinitions::Table, BucketDefinitions::ExpiresAt))
        .from(BucketBalances::Table)
        .left_join(
            BucketDefinitions::Table,
            Expr::col((BucketDefinitions::Table, BucketDefinitions::BucketInstanceId))
                .equals((BucketBalances::Table, BucketBalances::BucketInstanceId)),
        )
        .and_where(Expr::col((BucketBalances::Table, BucketBalances::Account)).eq(account))
        .and_where(Expr::col((BucketBalances::Table, BucketBalances::BucketType)).eq(bucket_type))
        .and_where(Expr::col((BucketBalances::Table, BucketBalances::Remaining)).gt(0))
        .order_by(
            (BucketBalances::Table, BucketBalances::BucketInstanceId),
            Order::Asc,
        )
        .to_owned()
}

/// Apply one deduction, guarded by the balance the allocator saw.
///
/// Affects zero rows if the bucket changed since it was read.
pub fn deduct_bucket(
    account: &str,
    bucket_type: &str,
    deduction: &Deduction,
    now: i64,
) -> UpdateStatement {
    Query::update()
        .table(BucketBalances::Table)
        .value(
            BucketBalances::Remaining,
            Expr::col(BucketBalances::Remaining).sub(deduction.amount),
        )
        .value(BucketBalances::LastModified, now)
        .and_where(Expr::col(BucketBalances::Account).eq(account))
        .and_where(Expr::col(BucketBalances::BucketType).eq(bucket_type))
        .and_where(Expr::col(BucketBalances::BucketInstanceId).eq(&deduction.bucket_instance_id))
        .and_where(Expr::col(BucketBalances::Remaining).eq(deduction.remaining_before))
        .to_owned()
}

/// Decrement an account total. Affects zero rows if the total would go
/// negative or does not exist.
pub fn deduct_total(account: &str, bucket_type: &str, amount: i64, now: i64) -> UpdateStatement {
    Query::update()
        .table(AccountTotalBalances::Table)
        .value(
            AccountTotalBalances::Remaining,
            Expr::col(AccountTotalBalances::Remaining).sub(amount),
        )
        .value(AccountTotalBalances::LastModified, now)
        .and_where(Expr::col(AccountTotalBalances::Account).eq(account))
        .and_where(Expr::col(AccountTotalBalances::BucketType).eq(bucket_type))
        .and_where(Expr::col(AccountTotalBalances::Remaining).gte(amount))
        .to_owned()
}

pub fn select_totals(account: &str) -> SelectStatement {
    Query::select()
        .columns([AccountTotalBalances::BucketType, AccountTotalBalances::Remaining])
        .from(AccountTotalBalances::Table)
        .and_where(Expr::col(AccountTotalBalances::Account).eq(account))
        .order_by(AccountTotalBalances::BucketType, Order::Asc)
        .to_owned()
}

pub fn select_buckets(account: &str, bucket_type: &str) -> SelectStatement {
    Query::select()
        .columns([
            BucketBalances::Account,
            BucketBalances::BucketType,
            BucketBalances::BucketInstanceId,
            BucketBalances::Earned,
            BucketBalances::Remaining,
            BucketBalances::LastModified,
        ])
        .from(BucketBalances::Table)
        .and_where(Expr::col(BucketBalances::Account).eq(account))
        .and_where(Expr::col(BucketBalances::BucketType).eq(bucket_type))
        .order_by(BucketBalances::BucketInstanceId, Order::Asc)
        .to_owned()
}

// ============================================================================
// Redemption log
// ============================================================================

pub fn insert_redemption(redemption: &RedemptionTransaction) -> Result<InsertStatement> {
    let detail = serde_json::to_string(&redemption.detail)?;
    Ok(Query::insert()
        .into_table(RedemptionTransactions::Table)
        .columns([
            RedemptionTransactions::RedemptionId,
            RedemptionTransactions::Account,
            RedemptionTransactions::BucketType,
            RedemptionTransactions::GamingDate,
            RedemptionTransactions::Redeemed,
            RedemptionTransactions::Source,
            RedemptionTransactions::Detail,
            RedemptionTransactions::CreatedAt,
            RedemptionTransactions::IsVoid,
        ])
        .values_panic([
            redemption.redemption_id.to_string().into(),
            redemption.account.as_str().into(),
            redemption.bucket_type.as_str().into(),
            format_gaming_date(redemption.gaming_date).into(),
            redemption.redeemed.into(),
            redemption.source.as_str().into(),
            detail.into(),
            redemption.created_at.timestamp_millis().into(),
            redemption.is_void.into(),
        ])
        .to_owned())
}

/// Redemptions of an account, newest first.
pub fn select_redemptions(account: &str) -> SelectStatement {
    Query::select()
        .columns([
            RedemptionTransactions::RedemptionId,
            RedemptionTransactions::Account,
            RedemptionTransactions::BucketType,
            RedemptionTransactions::GamingDate,
            RedemptionTransactions::Redeemed,
            RedemptionTransactions::Source,
            RedemptionTransactions::Detail,
            RedemptionTransactions::CreatedAt,
            RedemptionTransactions::IsVoid,
        ])
        .from(RedemptionTransactions::Table)
        .and_where(Expr::col(RedemptionTransactions::Account).eq(account))
        .order_by(RedemptionTransactions::CreatedAt, Order::Desc)
        .order_by(RedemptionTransactions::RedemptionId, Order::Desc)
        .to_owned()
}

// ============================================================================
// Bucket definitions
// ============================================================================

pub fn upsert_definition(definition: &BucketDefinition, now: i64) -> InsertStatement {
    Query::insert()
        .into_table(BucketDefinitions::Table)
        .columns([
            BucketDefinitions::BucketInstanceId,
            BucketDefinitions::Category,
            BucketDefinitions::ExpiresAt,
            BucketDefinitions::IsActive,
            BucketDefinitions::IsLatest,
            BucketDefinitions::UpdatedAt,
        ])
        .values_panic([
            definition.bucket_instance_id.as_str().into(),
            definition.category.as_str().into(),
            definition.expires_at.map(|at| at.timestamp_millis()).into(),
            definition.is_active.into(),
            definition.is_latest.into(),
            now.into(),
        ])
        .on_conflict(
            OnConflict::column(BucketDefinitions::BucketInstanceId)
                .update_columns([
                    BucketDefinitions::Category,
                    BucketDefinitions::ExpiresAt,
                    BucketDefinitions::IsActive,
                    BucketDefinitions::IsLatest,
                    BucketDefinitions::UpdatedAt,
                ])
                .to_owned(),
        )
        .to_owned()
}

fn definition_columns() -> [BucketDefinitions; 5] {
    [
        BucketDefinitions::BucketInstanceId,
        BucketDefinitions::Category,
        BucketDefinitions::ExpiresAt,
        BucketDefinitions::IsActive,
        BucketDefinitions::IsLatest,
    ]
}

pub fn select_definitions() -> SelectStatement {
    Query::select()
        .columns(definition_columns())
        .from(BucketDefinitions::Table)
        .order_by(BucketDefinitions::BucketInstanceId, Order::Asc)
        .to_owned()
}

pub fn select_definition(bucket_instance_id: &str) -> SelectStatement {
    Query::select()
        .columns(definition_columns())
        .from(BucketDefinitions::Table)
        .and_where(Expr::col(BucketDefinitions::BucketInstanceId).eq(bucket_instance_id))
        .to_owned()
}

/// Remove log rows created in `[start, end)`.
pub fn delete_created_between<T, C>(table: T, created_at: C, start: i64, end: i64) -> DeleteStatement
where
    T: IntoTableRef,
    C: IntoColumnRef,
{
    Query::delete()
        .from_table(table)
        .and_where(Expr::col(created_at).between(start, end - 1))
        .to_owned()
}
