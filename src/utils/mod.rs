//! Pure utility functions.
//!
//! Stateless helpers shared by the service and the maintenance binary.

pub mod bootstrap;
pub mod retry;
