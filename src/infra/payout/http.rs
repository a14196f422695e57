//! REST payout provider client.
//!
//! Speaks a RazorpayX-style payouts API: basic auth, amounts in paise,
//! `fund_account` carrying either a VPA or a phone number. Callers only see
//! [`SettlementError::Transient`] (safe to retry) or
//! [`SettlementError::Permanent`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, ConfigError, PayoutProvider, PayoutRequest, PayoutStatus, RecipientType,
    SettlementError,
};

/// Default payouts API base URL
pub const DEFAULT_PAYOUT_API_URL: &str = "https://api.razorpay.com/v1";

/// Longest narration the provider accepts
const MAX_NARRATION_CHARS: usize = 30;

/// Payout client configuration
#[derive(Debug)]
pub struct PayoutClientConfig {
    pub base_url: String,
    pub key_id: SecretString,
    pub key_secret: SecretString,
    /// Source account payouts are debited from
    pub account_number: SecretString,
    pub timeout: Duration,
}

impl PayoutClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        key_id: SecretString,
        key_secret: SecretString,
        account_number: SecretString,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            key_id,
            key_secret,
            account_number,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |key: &str| {
            std::env::var(key)
                .map(SecretString::from)
                .map_err(|_| ConfigError::MissingEnv(key.to_string()))
        };
        let base_url = std::env::var("PAYOUT_API_URL")
            .unwrap_or_else(|_| DEFAULT_PAYOUT_API_URL.to_string());
        Ok(Self::new(
            base_url,
            required("PAYOUT_API_KEY")?,
            required("PAYOUT_API_SECRET")?,
            required("PAYOUT_ACCOUNT_NUMBER")?,
        ))
    }
}

#[derive(Debug, Serialize)]
struct CreatePayoutBody<'a> {
    account_number: &'a str,
    /// Paise
    amount: i64,
    currency: &'static str,
    mode: &'static str,
    purpose: &'static str,
    reference_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    narration: Option<String>,
    fund_account: FundAccount<'a>,
}

#[derive(Debug, Serialize)]
struct FundAccount<'a> {
    account_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vpa: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_name: Option<&'a str>,
}

/// Payout entity as returned by the API and embedded in webhooks
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEntity {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl PayoutEntity {
    /// Map the provider status string onto [`PayoutStatus`]
    pub fn payout_status(&self) -> Result<PayoutStatus, SettlementError> {
        let reason = self.failure_reason.clone();
        match self.status.as_str() {
            "queued" | "pending" | "processing" => Ok(PayoutStatus::InFlight),
            "processed" => Ok(PayoutStatus::Processed),
            "failed" | "rejected" => Ok(PayoutStatus::Failed(reason)),
            "reversed" => Ok(PayoutStatus::Reversed(reason)),
            "cancelled" => Ok(PayoutStatus::Cancelled(reason)),
            other => Err(SettlementError::InvalidResponse(format!(
                "unknown payout status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PayoutCollection {
    #[serde(default)]
    items: Vec<PayoutEntity>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: ProviderErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Payout provider backed by the REST payouts API
pub struct HttpPayoutClient {
    http_client: Client,
    config: PayoutClientConfig,
}

impl HttpPayoutClient {
    pub fn new(config: PayoutClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        info!(base_url = %config.base_url, "Payout client configured");
        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(
            self.config.key_id.expose_secret(),
            Some(self.config.key_secret.expose_secret()),
        )
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, SettlementError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| SettlementError::Transient(format!("payout request failed: {}", e)))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    fn create_body<'a>(
        &'a self,
        request: &'a PayoutRequest,
    ) -> Result<CreatePayoutBody<'a>, SettlementError> {
        let (mode, fund_account) = match request.recipient_type {
            RecipientType::Upi => (
                "UPI",
                FundAccount {
                    account_type: "vpa",
                    vpa: Some(&request.recipient_value),
                    phone: None,
                    contact_name: request.recipient_name.as_deref(),
                },
            ),
            RecipientType::Phone => (
                "IMPS",
                FundAccount {
                    account_type: "phone",
                    vpa: None,
                    phone: Some(&request.recipient_value),
                    contact_name: request.recipient_name.as_deref(),
                },
            ),
        };
        Ok(CreatePayoutBody {
            account_number: self.config.account_number.expose_secret(),
            amount: to_paise(request.amount)?,
            currency: "INR",
            mode,
            purpose: "payout",
            reference_id: &request.reference_id,
            narration: request
                .narration
                .as_deref()
                .map(|n| n.chars().take(MAX_NARRATION_CHARS).collect()),
            fund_account,
        })
    }
}

/// Convert rupees to integer paise
pub fn to_paise(amount: Decimal) -> Result<i64, SettlementError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| SettlementError::Permanent(format!("amount {} out of range", amount)))
}

/// 5xx, 408 and 429 are worth retrying; any other 4xx is final
fn classify_failure(status: StatusCode, body: &str) -> SettlementError {
    let message = format!("provider returned {}: {}", status.as_u16(), body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SettlementError::Transient(message)
    } else {
        SettlementError::Permanent(message)
    }
}

/// Whether a rejection means a payout with this reference already exists
fn is_duplicate_reference(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    let parsed: ProviderErrorBody = serde_json::from_str(body).unwrap_or_default();
    if parsed.error.code.as_deref() == Some("DUPLICATE_REFERENCE") {
        return true;
    }
    parsed
        .error
        .description
        .map(|d| {
            let d = d.to_lowercase();
            d.contains("reference") && (d.contains("already") || d.contains("duplicate"))
        })
        .unwrap_or(false)
}

#[async_trait]
impl PayoutProvider for HttpPayoutClient {
    async fn health_check(&self) -> Result<(), AppError> {
        let builder = self
            .http_client
            .get(self.url("/payouts"))
            .query(&[("count", "1")]);
        self.send(builder)
            .await
            .map(|_| ())
            .map_err(AppError::Settlement)
    }

    #[instrument(skip(self, request), fields(reference = %request.reference_id, amount = %request.amount))]
    async fn create_payout(&self, request: &PayoutRequest) -> Result<String, SettlementError> {
        let body = self.create_body(request)?;
        let response = self
            .authorized(self.http_client.post(self.url("/payouts")))
            .json(&body)
            .send()
            .await
            .map_err(|e| SettlementError::Transient(format!("payout request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let entity: PayoutEntity = response
                .json()
                .await
                .map_err(|e| SettlementError::InvalidResponse(e.to_string()))?;
            debug!(payout_id = %entity.id, status = %entity.status, "Payout accepted");
            return Ok(entity.id);
        }

        let text = response.text().await.unwrap_or_default();
        if is_duplicate_reference(status, &text) {
            warn!(reference = %request.reference_id, "Payout reference already used, looking it up");
            return match self.find_payout_by_reference(&request.reference_id).await? {
                Some(id) => Ok(id),
                None => Err(SettlementError::Transient(format!(
                    "duplicate reference {} not yet visible",
                    request.reference_id
                ))),
            };
        }
        Err(classify_failure(status, &text))
    }

    #[instrument(skip(self))]
    async fn get_payout_status(&self, external_id: &str) -> Result<PayoutStatus, SettlementError> {
        let response = self
            .send(self.http_client.get(self.url(&format!("/payouts/{}", external_id))))
            .await?;
        let entity: PayoutEntity = response
            .json()
            .await
            .map_err(|e| SettlementError::InvalidResponse(e.to_string()))?;
        entity.payout_status()
    }

    #[instrument(skip(self))]
    async fn find_payout_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<String>, SettlementError> {
        let builder = self
            .http_client
            .get(self.url("/payouts"))
            .query(&[("reference_id", reference_id)]);
        let collection: PayoutCollection = self
            .send(builder)
            .await?
            .json()
            .await
            .map_err(|e| SettlementError::InvalidResponse(e.to_string()))?;
        Ok(collection
            .items
            .into_iter()
            .find(|p| p.reference_id.as_deref().is_none_or(|r| r == reference_id))
            .map(|p| p.id))
    }
}
