//! Payout webhook authentication and decoding.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::domain::{AppError, PayoutNotification, PayoutStatus};

use super::http::PayoutEntity;

/// Header carrying hex(HMAC-SHA256(secret, raw body))
pub const SIGNATURE_HEADER: &str = "X-Payout-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct EventHeader {
    event: String,
}

#[derive(Debug, Deserialize)]
struct PayoutEvent {
    payload: PayoutEventPayload,
}

#[derive(Debug, Deserialize)]
struct PayoutEventPayload {
    payout: PayoutWrapper,
}

#[derive(Debug, Deserialize)]
struct PayoutWrapper {
    entity: PayoutEntity,
}

/// Verifies provider webhook signatures
pub struct WebhookVerifier {
    secret: SecretString,
}

impl WebhookVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(body);
        Some(mac)
    }

    /// Hex signature for `body`
    pub fn sign(&self, body: &[u8]) -> String {
        self.mac(body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of a hex signature against the raw body
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let Some(mac) = self.mac(body) else {
            return false;
        };
        let expected = mac.finalize().into_bytes();
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }
}

/// Decode a verified webhook body.
///
/// Returns `Ok(None)` for events that carry no settlement outcome; those are
/// acknowledged and dropped.
pub fn parse_notification(body: &[u8]) -> Result<Option<PayoutNotification>, AppError> {
    let header: EventHeader = serde_json::from_slice(body)?;
    let reason_status: fn(Option<String>) -> PayoutStatus = match header.event.as_str() {
        "payout.processed" => |_| PayoutStatus::Processed,
        "payout.failed" | "payout.rejected" => PayoutStatus::Failed,
        "payout.reversed" => PayoutStatus::Reversed,
        "payout.cancelled" => PayoutStatus::Cancelled,
        other => {
            debug!(event = %other, "Ignoring payout webhook event");
            return Ok(None);
        }
    };

    let event: PayoutEvent = serde_json::from_slice(body)?;
    let entity = event.payload.payout.entity;
    Ok(Some(PayoutNotification {
        external_id: entity.id,
        reference_id: entity.reference_id,
        status: reason_status(entity.failure_reason),
    }))
}
