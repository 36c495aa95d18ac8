//! Input validation for records crossing the trust boundary.
//!
//! Earning records come from an upstream rule engine and redemption
//! requests from arbitrary callers; both are checked here before any
//! transaction is opened.

use std::fmt;

use super::model::{BucketDefinition, EarningTransaction, RedemptionRequest};

/// Length limits for validated fields.
pub mod limits {
    /// Maximum account identifier length.
    pub const MAX_ACCOUNT_LENGTH: usize = 64;
    /// Maximum bucket type length (e.g., "point", "comp").
    pub const MAX_BUCKET_TYPE_LENGTH: usize = 32;
    /// Maximum bucket instance / transaction / rule identifier length.
    pub const MAX_IDENTIFIER_LENGTH: usize = 128;
    /// Maximum category length.
    pub const MAX_CATEGORY_LENGTH: usize = 64;
    /// Maximum redemption source label length.
    pub const MAX_SOURCE_LENGTH: usize = 64;
    /// Maximum single earning or redemption amount, in the smallest unit.
    pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const EMPTY: &str = "must not be empty";
    pub const TOO_LONG: &str = "exceeds maximum length";
    pub const CONTROL_CHARS: &str = "contains control characters";
    pub const BUCKET_TYPE_CHARS: &str =
        "must start with a lowercase letter and contain only a-z, 0-9, _ or -";
    pub const NEGATIVE_EARNING: &str = "earned amount must not be negative";
    pub const NON_POSITIVE_AMOUNT: &str = "amount must be greater than zero";
    pub const UNKNOWN_BUCKET: &str = "no bucket definition exists for this instance";
    pub const INACTIVE_BUCKET: &str = "bucket definition is not active";
    pub const CATEGORY_MISMATCH: &str = "category does not match the bucket definition";
    pub const AMOUNT_TOO_LARGE: &str = "amount exceeds the maximum single amount";
    pub const AMOUNT_OVERFLOW: &str = "summed amounts overflow the balance range";
    pub const CORRECTION_UNDERFLOW: &str =
        "correction would drive the bucket's remaining balance below zero";
}

/// A rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Human-readable reason.
    pub reason: String,
    /// Position of the record in the submitted batch, if any.
    pub record: Option<usize>,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
            record: None,
        }
    }

    /// Attach the batch position of the offending record.
    pub fn at(mut self, index: usize) -> Self {
        self.record = Some(index);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record {
            Some(index) => write!(f, "Invalid {} in record {}: {}", self.field, index, self.reason),
            None => write!(f, "Invalid {}: {}", self.field, self.reason),
        }
    }
}

fn validate_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, errmsg::EMPTY));
    }
    if value.len() > max {
        return Err(ValidationError::new(
            field,
            format!("{} (max: {}, got: {})", errmsg::TOO_LONG, max, value.len()),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::new(field, errmsg::CONTROL_CHARS));
    }
    Ok(())
}

/// Validate a bucket type name.
///
/// Rules:
/// - Must not be empty
/// - Maximum 32 characters
/// - Must start with lowercase letter (a-z)
/// - May contain: lowercase letters (a-z), digits (0-9), underscore (_), hyphen (-)
pub fn validate_bucket_type(bucket_type: &str) -> Result<(), ValidationError> {
    validate_text("bucket_type", bucket_type, limits::MAX_BUCKET_TYPE_LENGTH)?;

    let mut chars = bucket_type.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_rest = chars.all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'));
    if !valid_start || !valid_rest {
        return Err(ValidationError::new("bucket_type", errmsg::BUCKET_TYPE_CHARS));
    }
    Ok(())
}

pub fn validate_account(account: &str) -> Result<(), ValidationError> {
    validate_text("account", account, limits::MAX_ACCOUNT_LENGTH)
}

/// Validate one earning record.
pub fn validate_earning(record: &EarningTransaction) -> Result<(), ValidationError> {
    validate_text(
        "transaction_id",
        &record.transaction_id,
        limits::MAX_IDENTIFIER_LENGTH,
    )?;
    validate_text("category", &record.category, limits::MAX_CATEGORY_LENGTH)?;
    validate_bucket_type(&record.bucket_type)?;
    validate_text(
        "bucket_instance_id",
        &record.bucket_instance_id,
        limits::MAX_IDENTIFIER_LENGTH,
    )?;
    validate_account(&record.account)?;
    validate_text(
        "earning_rule_id",
        &record.earning_rule_id,
        limits::MAX_IDENTIFIER_LENGTH,
    )?;
    if record.earned < 0 {
        return Err(ValidationError::new("earned", errmsg::NEGATIVE_EARNING));
    }
    if record.earned > limits::MAX_AMOUNT {
        return Err(ValidationError::new("earned", errmsg::AMOUNT_TOO_LARGE));
    }
    Ok(())
}

/// Validate a whole batch, reporting the first offending record.
pub fn validate_batch(records: &[EarningTransaction]) -> Result<(), ValidationError> {
    for (index, record) in records.iter().enumerate() {
        validate_earning(record).map_err(|e| e.at(index))?;
    }
    Ok(())
}

/// Check an earning record against its bucket definition.
///
/// `definition` is `None` when the reference data has no such instance.
pub fn validate_against_definition(
    record: &EarningTransaction,
    definition: Option<&BucketDefinition>,
) -> Result<(), ValidationError> {
    let definition = definition
        .ok_or_else(|| ValidationError::new("bucket_instance_id", errmsg::UNKNOWN_BUCKET))?;
    if !definition.is_active {
        return Err(ValidationError::new(
            "bucket_instance_id",
            errmsg::INACTIVE_BUCKET,
        ));
    }
    if definition.category != record.category {
        return Err(ValidationError::new(
            "category",
            format!(
                "{} (definition: {}, got: {})",
                errmsg::CATEGORY_MISMATCH,
                definition.category,
                record.category
            ),
        ));
    }
    Ok(())
}

/// Validate a redemption request.
pub fn validate_redemption(request: &RedemptionRequest) -> Result<(), ValidationError> {
    validate_account(&request.account)?;
    validate_bucket_type(&request.bucket_type)?;
    validate_text("source", &request.source, limits::MAX_SOURCE_LENGTH)?;
    if request.amount <= 0 {
        return Err(ValidationError::new("amount", errmsg::NON_POSITIVE_AMOUNT));
    }
    if request.amount > limits::MAX_AMOUNT {
        return Err(ValidationError::new("amount", errmsg::AMOUNT_TOO_LARGE));
    }
    Ok(())
}
