//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building,
//! plus the DDL each backend runs on `init()`. Timestamps are epoch
//! milliseconds (`BIGINT`), gaming dates are `YYYY-MM-DD` text.

use sea_query::Iden;

/// Earning log.
#[derive(Iden)]
pub enum EarningTransactions {
    Table,
    #[iden = "transaction_id"]
    TransactionId,
    #[iden = "category"]
    Category,
    #[iden = "bucket_type"]
    BucketType,
    #[iden = "bucket_instance_id"]
    BucketInstanceId,
    #[iden = "gaming_date"]
    GamingDate,
    #[iden = "account"]
    Account,
    #[iden = "earned"]
    Earned,
    #[iden = "last_modified"]
    LastModified,
    #[iden = "earning_rule_id"]
    EarningRuleId,
    #[iden = "is_void"]
    IsVoid,
    /// First-insert time; the partition key.
    #[iden = "created_at"]
    CreatedAt,
}

/// Per-bucket balances.
#[derive(Iden)]
pub enum BucketBalances {
    Table,
    #[iden = "account"]
    Account,
    #[iden = "bucket_type"]
    BucketType,
    #[iden = "bucket_instance_id"]
    BucketInstanceId,
    #[iden = "earned"]
    Earned,
    #[iden = "remaining"]
    Remaining,
    #[iden = "last_modified"]
    LastModified,
}

/// Account totals per bucket type.
#[derive(Iden)]
pub enum AccountTotalBalances {
    Table,
    #[iden = "account"]
    Account,
    #[iden = "bucket_type"]
    BucketType,
    #[iden = "remaining"]
    Remaining,
    #[iden = "last_modified"]
    LastModified,
}

/// Redemption log.
#[derive(Iden)]
pub enum RedemptionTransactions {
    Table,
    #[iden = "redemption_id"]
    RedemptionId,
    #[iden = "account"]
    Account,
    #[iden = "bucket_type"]
    BucketType,
    #[iden = "gaming_date"]
    GamingDate,
    #[iden = "redeemed"]
    Redeemed,
    #[iden = "source"]
    Source,
    #[iden = "detail"]
    Detail,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "is_void"]
    IsVoid,
}

/// Reference data mirrored from the bucket definition owner.
#[derive(Iden)]
pub enum BucketDefinitions {
    Table,
    #[iden = "bucket_instance_id"]
    BucketInstanceId,
    #[iden = "category"]
    Category,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "is_active"]
    IsActive,
    #[iden = "is_latest"]
    IsLatest,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQLite partition registry.
#[derive(Iden)]
pub enum LedgerPartitions {
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "period"]
    Period,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQLite retention watermark consulted by the redemption delete guard.
#[derive(Iden)]
pub enum LedgerRetention {
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "watermark"]
    Watermark,
}

/// SQLite schema.
///
/// SQLite has no partitioning; `ledger_partitions` records the monthly
/// ranges maintenance has prepared, and redemption rows may only be deleted
/// below the watermark that a retention purge sets first.
pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS earning_transactions (
    transaction_id TEXT NOT NULL,
    category TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    bucket_instance_id TEXT NOT NULL,
    gaming_date TEXT NOT NULL,
    account TEXT NOT NULL,
    earned INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    earning_rule_id TEXT NOT NULL,
    is_void INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (transaction_id, category, bucket_type, bucket_instance_id)
);

CREATE INDEX IF NOT EXISTS idx_earning_created_at ON earning_transactions(created_at);

CREATE TABLE IF NOT EXISTS bucket_balances (
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    bucket_instance_id TEXT NOT NULL,
    earned INTEGER NOT NULL,
    remaining INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    PRIMARY KEY (account, bucket_type, bucket_instance_id)
);

CREATE TABLE IF NOT EXISTS account_total_balances (
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    remaining INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    PRIMARY KEY (account, bucket_type)
);

CREATE TABLE IF NOT EXISTS redemption_transactions (
    redemption_id TEXT NOT NULL PRIMARY KEY,
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    gaming_date TEXT NOT NULL,
    redeemed INTEGER NOT NULL,
    source TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    is_void INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_redemption_account ON redemption_transactions(account, created_at);

CREATE TABLE IF NOT EXISTS bucket_definitions (
    bucket_instance_id TEXT NOT NULL PRIMARY KEY,
    category TEXT NOT NULL,
    expires_at INTEGER,
    is_active INTEGER NOT NULL,
    is_latest INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_partitions (
    table_name TEXT NOT NULL,
    period TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (table_name, period)
);

CREATE TABLE IF NOT EXISTS ledger_retention (
    table_name TEXT NOT NULL PRIMARY KEY,
    watermark INTEGER NOT NULL
);

CREATE TRIGGER IF NOT EXISTS redemption_transactions_no_update
BEFORE UPDATE ON redemption_transactions
BEGIN
    SELECT RAISE(ABORT, 'redemption_transactions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS redemption_transactions_no_delete
BEFORE DELETE ON redemption_transactions
WHEN OLD.created_at >= COALESCE(
    (SELECT watermark FROM ledger_retention WHERE table_name = 'redemption_transactions'),
    -9223372036854775808
)
BEGIN
    SELECT RAISE(ABORT, 'redemption_transactions rows may only be removed by retention');
END;
"#;

/// PostgreSQL schema.
///
/// Both logs are range-partitioned by month on `created_at`; monthly
/// partitions (hash-subpartitioned by account) are created by maintenance.
/// Partitioned tables cannot carry a unique key that omits the partition
/// key, so earning identity is enforced by the ingestion path under
/// transaction-scoped advisory locks, backed by a lookup index.
pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS earning_transactions (
    transaction_id TEXT NOT NULL,
    category TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    bucket_instance_id TEXT NOT NULL,
    gaming_date TEXT NOT NULL,
    account TEXT NOT NULL,
    earned BIGINT NOT NULL,
    last_modified BIGINT NOT NULL,
    earning_rule_id TEXT NOT NULL,
    is_void BOOLEAN NOT NULL DEFAULT FALSE,
    created_at BIGINT NOT NULL
) PARTITION BY RANGE (created_at);

CREATE INDEX IF NOT EXISTS idx_earning_identity
    ON earning_transactions(transaction_id, category, bucket_type, bucket_instance_id);

CREATE TABLE IF NOT EXISTS bucket_balances (
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    bucket_instance_id TEXT NOT NULL,
    earned BIGINT NOT NULL,
    remaining BIGINT NOT NULL,
    last_modified BIGINT NOT NULL,
    PRIMARY KEY (account, bucket_type, bucket_instance_id)
);

CREATE TABLE IF NOT EXISTS account_total_balances (
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    remaining BIGINT NOT NULL,
    last_modified BIGINT NOT NULL,
    PRIMARY KEY (account, bucket_type)
);

CREATE TABLE IF NOT EXISTS redemption_transactions (
    redemption_id TEXT NOT NULL,
    account TEXT NOT NULL,
    bucket_type TEXT NOT NULL,
    gaming_date TEXT NOT NULL,
    redeemed BIGINT NOT NULL,
    source TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    is_void BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (redemption_id, created_at, account)
) PARTITION BY RANGE (created_at);

CREATE INDEX IF NOT EXISTS idx_redemption_account
    ON redemption_transactions(account, created_at);

CREATE TABLE IF NOT EXISTS bucket_definitions (
    bucket_instance_id TEXT NOT NULL PRIMARY KEY,
    category TEXT NOT NULL,
    expires_at BIGINT,
    is_active BOOLEAN NOT NULL,
    is_latest BOOLEAN NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE OR REPLACE FUNCTION ledger_reject_mutation() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION '% is append-only', TG_TABLE_NAME;
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE TRIGGER redemption_transactions_append_only
    BEFORE UPDATE OR DELETE ON redemption_transactions
    FOR EACH ROW EXECUTE FUNCTION ledger_reject_mutation();
"#;
