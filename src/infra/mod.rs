//! Infrastructure layer implementations.

pub mod database;
pub mod payout;

pub use database::{PostgresClient, PostgresConfig};
pub use payout::{HttpPayoutClient, PayoutClientConfig, WebhookVerifier, parse_notification};
