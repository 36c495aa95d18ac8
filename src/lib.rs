//! bucket-ledger - bucket-based loyalty ledger
//!
//! Earnings land in expiring reward buckets, redemptions consume the
//! earliest-expiring value first, and per-account totals stay consistent with
//! the buckets under concurrent access. State lives in SQLite or PostgreSQL
//! behind the [`storage::LedgerStore`] trait.

pub mod config;
pub mod error;
pub mod ledger;
pub mod maintenance;
pub mod reference;
pub mod storage;
pub mod utils;

pub use error::{LedgerError, Result, StorageError};
pub use ledger::LedgerService;
