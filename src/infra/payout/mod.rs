//! Payout provider integration.

mod http;
mod webhook;

pub use http::{DEFAULT_PAYOUT_API_URL, HttpPayoutClient, PayoutClientConfig, PayoutEntity, to_paise};
pub use webhook::{SIGNATURE_HEADER, WebhookVerifier, parse_notification};
