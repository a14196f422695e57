//! Test utilities: in-memory store and scriptable payout provider.

pub mod mocks;

pub use mocks::{MockConfig, MockDatabaseClient, MockPayoutProvider};
