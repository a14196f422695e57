//! Custodial INR wallet ledger with an outbound UPI/phone payout settlement engine.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
