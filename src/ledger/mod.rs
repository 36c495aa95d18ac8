//! Ledger domain: types, validation, planning and the service facade.

pub mod allocation;
pub mod idempotency;
pub mod ingest;
pub mod model;
pub mod service;
pub mod validation;

pub use idempotency::{Fingerprint, IdempotencyGuard};
pub use model::{
    AccountTotals, BatchOutcome, BucketBalance, BucketDefinition, EarningKey, EarningTransaction,
    RedemptionDetail, RedemptionReceipt, RedemptionRequest, RedemptionTransaction, TotalDrift,
};
pub use service::LedgerService;
pub use validation::ValidationError;
