//! Ledger error taxonomy.
//!
//! Business-rule failures (`Validation`, `InsufficientBalance`,
//! `DuplicateRequest`) are reported separately from infrastructure failures
//! (`ContentionTimeout`, `Store`) so callers can decide to retry only the
//! latter. Every variant is raised after the enclosing transaction has been
//! rolled back; none of them implies partially applied state.

use crate::ledger::validation::ValidationError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed or incomplete input, rejected before any write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Total remaining across the candidate buckets does not cover the request.
    #[error(
        "Insufficient balance: account={account}, bucket_type={bucket_type}, requested={requested}, available={available}"
    )]
    InsufficientBalance {
        account: String,
        bucket_type: String,
        requested: i64,
        available: i64,
    },

    /// An identical request was seen inside the idempotency window.
    #[error("Duplicate request suppressed: fingerprint={fingerprint}")]
    DuplicateRequest { fingerprint: String },

    /// Lock wait, busy timeout or statement timeout exceeded. Retryable.
    #[error("Contention timeout: {0}")]
    ContentionTimeout(String),

    /// Infrastructure fault. Fatal for the current operation.
    #[error("Storage error: {0}")]
    Store(#[from] StorageError),
}

impl LedgerError {
    /// Whether the caller may retry the identical request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ContentionTimeout(_))
    }

    /// Whether the failure is a business-rule rejection rather than an
    /// infrastructure fault.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(_)
                | LedgerError::InsufficientBalance { .. }
                | LedgerError::DuplicateRequest { .. }
        )
    }
}

/// Infrastructure-level storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Bucket {bucket_instance_id} changed underneath a locked redemption")]
    ConcurrentModification { bucket_instance_id: String },

    #[error("Unknown storage type: {0}")]
    UnknownBackend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLite result codes for a busy or locked database, including the
/// extended codes (`SQLITE_BUSY_RECOVERY`, `SQLITE_BUSY_SNAPSHOT`,
/// `SQLITE_BUSY_TIMEOUT`, `SQLITE_LOCKED_SHAREDCACHE`).
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// PostgreSQL SQLSTATEs for lock_not_available, query_canceled (statement or
/// lock timeout), deadlock_detected and serialization_failure.
const POSTGRES_CONTENTION_CODES: &[&str] = &["55P03", "57014", "40P01", "40001"];

/// Whether a database error means "gave up waiting", as opposed to a fault.
pub(crate) fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            SQLITE_CONTENTION_CODES.contains(&code.as_ref())
                || POSTGRES_CONTENTION_CODES.contains(&code.as_ref())
        }),
        _ => false,
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            LedgerError::ContentionTimeout(err.to_string())
        } else {
            LedgerError::Store(StorageError::Database(err))
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Store(StorageError::Serialization(err))
    }
}
