//! Shared ledger store integration tests.
//!
//! Tests the LedgerStore contract against all implementations. Each backend
//! test file imports these test functions and runs them through
//! `run_ledger_store_tests!`.
//!
//! Every test works on its own account, so the suite can share one database.

pub mod ledger_store_tests;
