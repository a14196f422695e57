//! Domain types with validation support.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::recipient::RecipientType;

/// Currency every wallet is denominated in
pub const DEFAULT_CURRENCY: &str = "INR";

/// Lifecycle status of a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    /// Temporarily blocked; no reservations or releases
    Frozen,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "frozen" => Ok(Self::Frozen),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid wallet status: {}", s)),
        }
    }
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of balance-affecting ledger event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credit from the payment gateway
    Load,
    /// Internal spend
    Debit,
    /// Reservation backing an outbound payout
    ExternalTransfer,
    /// Compensation for a payout that did not settle
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Debit => "debit",
            Self::ExternalTransfer => "external_transfer",
            Self::Refund => "refund",
        }
    }

    /// Whether this entry moves money out of the wallet
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Debit | Self::ExternalTransfer)
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load" => Ok(Self::Load),
            "debit" => Ok(Self::Debit),
            "external_transfer" => Ok(Self::ExternalTransfer),
            "refund" => Ok(Self::Refund),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a ledger entry. Entries are immutable once terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External transfer state machine.
///
/// `pending -> processing -> {success | failed | cancelled | refunded}`.
/// `failed`, `cancelled` and `refunded` always carry exactly one refund
/// ledger entry; `refunded` is reserved for provider-side reversals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Funds reserved, payout not yet accepted by the provider
    #[default]
    Pending,
    /// Provider accepted the payout, awaiting a terminal outcome
    Processing,
    Success,
    Failed,
    Cancelled,
    /// Provider reversed the payout; funds returned
    Refunded,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    /// Statuses whose reserved total counts against spending limits
    pub fn counts_as_used(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Success)
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("Invalid transfer status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who initiated a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferChannel {
    /// User-initiated from the app
    #[default]
    Direct,
    /// Created from a parsed payment intent; subject to assistant sub-limits
    Assistant,
}

impl TransferChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for TransferChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Invalid transfer channel: {}", s)),
        }
    }
}

/// Per-wallet spending limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct SpendingLimits {
    #[schema(value_type = String, example = "25000.00")]
    pub daily_limit: Decimal,
    #[schema(value_type = String, example = "100000.00")]
    pub monthly_limit: Decimal,
    #[schema(value_type = String, example = "10000.00")]
    pub per_transaction_limit: Decimal,
    /// Daily cap over assistant-initiated transfers only
    #[schema(value_type = String, example = "5000.00")]
    pub ai_daily_limit: Decimal,
    #[schema(value_type = String, example = "2000.00")]
    pub ai_per_transaction_limit: Decimal,
}

impl Default for SpendingLimits {
    fn default() -> Self {
        Self {
            daily_limit: Decimal::from(25_000),
            monthly_limit: Decimal::from(100_000),
            per_transaction_limit: Decimal::from(10_000),
            ai_daily_limit: Decimal::from(5_000),
            ai_per_transaction_limit: Decimal::from(2_000),
        }
    }
}

/// Custodial wallet owned by exactly one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Wallet {
    #[schema(example = "01928f5e-1c2a-7b3d-9e4f-a1b2c3d4e5f6")]
    pub id: String,
    #[schema(example = "user_42")]
    pub user_id: String,
    /// Spendable balance, never negative
    #[schema(value_type = String, example = "1000.00")]
    pub balance: Decimal,
    #[schema(example = "INR")]
    pub currency: String,
    pub status: WalletStatus,
    #[serde(flatten)]
    pub limits: SpendingLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    #[must_use]
    pub fn new(id: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            balance: Decimal::ZERO,
            currency: DEFAULT_CURRENCY.to_string(),
            status: WalletStatus::Active,
            limits: SpendingLimits::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Transaction {
    pub id: String,
    pub wallet_id: String,
    pub transaction_type: TransactionType,
    /// Always positive; direction follows from `transaction_type`
    #[schema(value_type = String, example = "102.00")]
    pub amount: Decimal,
    /// Wallet balance immediately after this entry was applied
    #[schema(value_type = String, example = "898.00")]
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub description: Option<String>,
    /// Payment gateway order id (loads only)
    pub gateway_order_id: Option<String>,
    /// Payment gateway payment id (loads only), unique
    pub gateway_payment_id: Option<String>,
    #[schema(example = "TXN20261019101500A1B2C3D4E5F6")]
    pub reference_id: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One outbound payout attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ExternalTransfer {
    pub id: String,
    pub wallet_id: String,
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    #[schema(value_type = String, example = "2.00")]
    pub fee: Decimal,
    /// amount + fee; the sum reserved from the wallet
    #[schema(value_type = String, example = "102.00")]
    pub total_amount: Decimal,
    pub recipient_type: RecipientType,
    #[schema(example = "user@bank")]
    pub recipient_value: String,
    pub recipient_name: Option<String>,
    pub description: Option<String>,
    pub channel: TransferChannel,
    pub status: TransferStatus,
    /// Provider-side payout id once accepted
    pub external_id: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    #[schema(value_type = String)]
    pub balance_before: Decimal,
    #[schema(value_type = String)]
    pub balance_after: Decimal,
    /// Linked reservation ledger entry (1:1)
    pub transaction_id: String,
    /// Compensation ledger entry, set when funds were returned
    pub refund_transaction_id: Option<String>,
    #[schema(example = "EXT20261019101500A1B2C3D4E5F6")]
    pub reference_id: String,
    pub idempotency_key: Option<String>,
    pub failure_reason: Option<String>,
    /// When the settlement worker should next look at this transfer
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the provider accepted the payout; start of the polling window
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to validate (dry-run) an external transfer.
/// Every problem is reported in [`TransferValidation`], never as a rejected request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateTransferRequest {
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    pub recipient_type: RecipientType,
    #[schema(example = "user@bank")]
    pub recipient_value: String,
    #[serde(default)]
    pub channel: TransferChannel,
}

/// Request to create an external transfer
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateTransferRequest {
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    pub recipient_type: RecipientType,
    #[validate(length(min = 1, max = 320, message = "Recipient is required"))]
    #[schema(example = "user@bank")]
    pub recipient_value: String,
    #[validate(length(max = 100, message = "Recipient name must be at most 100 characters"))]
    pub recipient_name: Option<String>,
    #[validate(length(max = 255, message = "Description must be at most 255 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    pub channel: TransferChannel,
    /// Client-supplied key; a repeat returns the original transfer
    #[validate(length(min = 1, max = 128, message = "Idempotency key must be 1-128 characters"))]
    pub idempotency_key: Option<String>,
}

impl CreateTransferRequest {
    #[must_use]
    pub fn new(amount: Decimal, recipient_type: RecipientType, recipient_value: &str) -> Self {
        Self {
            amount,
            recipient_type,
            recipient_value: recipient_value.to_string(),
            recipient_name: None,
            description: None,
            channel: TransferChannel::Direct,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn via(mut self, channel: TransferChannel) -> Self {
        self.channel = channel;
        self
    }

    /// The rule-checking view of this request
    pub fn as_validation(&self) -> ValidateTransferRequest {
        ValidateTransferRequest {
            amount: self.amount,
            recipient_type: self.recipient_type,
            recipient_value: self.recipient_value.clone(),
            channel: self.channel,
        }
    }
}

/// Outcome of running the transfer rule set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransferValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[schema(value_type = String, example = "2.00")]
    pub fee: Decimal,
    #[schema(value_type = String, example = "102.00")]
    pub total: Decimal,
    #[schema(example = "Instant (usually within 30 seconds)")]
    pub estimated_time: String,
}

/// Response for a created transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CreateTransferResponse {
    pub id: String,
    pub reference_id: String,
    #[schema(value_type = String)]
    pub fee: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub status: TransferStatus,
    pub estimated_time: String,
}

/// Caller-facing view of a transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransferView {
    pub id: String,
    pub reference_id: String,
    pub status: TransferStatus,
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub fee: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub recipient_type: RecipientType,
    #[schema(example = "******3210")]
    pub recipient_display: String,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ExternalTransfer> for TransferView {
    fn from(t: &ExternalTransfer) -> Self {
        Self {
            id: t.id.clone(),
            reference_id: t.reference_id.clone(),
            status: t.status,
            amount: t.amount,
            fee: t.fee,
            total: t.total_amount,
            recipient_type: t.recipient_type,
            recipient_display: super::recipient::display_name(
                t.recipient_type,
                &t.recipient_value,
                t.recipient_name.as_deref(),
            ),
            description: t.description.clone(),
            failure_reason: t.failure_reason.clone(),
            created_at: t.created_at,
            completed_at: t.completed_at,
        }
    }
}

/// Filters for listing a wallet's transfers
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransferFilters {
    pub status: Option<TransferStatus>,
    pub recipient_type: Option<RecipientType>,
    /// Inclusive lower bound on creation time
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time
    pub to: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1_000_000, message = "Page must be between 1 and 1000000"))]
    #[serde(default = "default_page")]
    pub page: i64,
    #[validate(range(min = 1, max = 100, message = "Per-page must be between 1 and 100"))]
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

impl Default for TransferFilters {
    fn default() -> Self {
        Self {
            status: None,
            recipient_type: None,
            from: None,
            to: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl TransferFilters {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Aggregate stats over the filtered transfer set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransferSummary {
    pub total_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub pending_count: i64,
    /// success_count / finished transfers, in percent
    pub success_rate: f64,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[schema(value_type = String)]
    pub total_fees: Decimal,
}

impl TransferSummary {
    /// Percentage of finished transfers that succeeded
    pub fn rate(success_count: i64, failed_count: i64) -> f64 {
        let finished = success_count + failed_count;
        if finished == 0 {
            return 0.0;
        }
        (success_count as f64 / finished as f64 * 10_000.0).round() / 100.0
    }
}

/// Page/per-page pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    #[validate(range(min = 1, max = 1_000_000, message = "Page must be between 1 and 1000000"))]
    #[serde(default = "default_page")]
    pub page: i64,
    #[validate(range(min = 1, max = 100, message = "Per-page must be between 1 and 100"))]
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageParams {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page.max(0))
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T: ToSchema> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T: ToSchema> Page<T> {
    pub fn new(items: Vec<T>, params: &PageParams, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + params.per_page - 1) / params.per_page
        };
        Self {
            items,
            page: params.page,
            per_page: params.per_page,
            total_items,
            total_pages,
        }
    }
}

/// Transfer list with summary stats
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferList {
    pub transfers: Page<TransferView>,
    pub summary: TransferSummary,
}

/// Gateway-confirmed wallet top-up
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoadWalletRequest {
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
    #[validate(length(min = 1, message = "Gateway order id is required"))]
    pub gateway_order_id: String,
    #[validate(length(min = 1, message = "Gateway payment id is required"))]
    pub gateway_payment_id: String,
}

/// Internal spend from the wallet
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SpendRequest {
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    #[validate(length(max = 255, message = "Description must be at most 255 characters"))]
    pub description: Option<String>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub payout_provider: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, payout_provider: HealthStatus) -> Self {
        // The ledger keeps accepting reservations while the provider is down;
        // the settlement worker retries later.
        let status = match (&database, &payout_provider) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            payout_provider,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "validation_error")]
    pub r#type: String,
    #[schema(example = "Invalid UPI ID format, expected name@provider")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transfer_status_display_and_parsing() {
        let statuses = vec![
            (TransferStatus::Pending, "pending"),
            (TransferStatus::Processing, "processing"),
            (TransferStatus::Success, "success"),
            (TransferStatus::Failed, "failed"),
            (TransferStatus::Cancelled, "cancelled"),
            (TransferStatus::Refunded, "refunded"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(TransferStatus::from_str(string).unwrap(), status);
        }

        assert!(TransferStatus::from_str("settled").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Processing.is_terminal());
        assert!(TransferStatus::Success.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::Refunded.is_terminal());
    }

    #[test]
    fn test_in_flight_transfers_count_against_limits() {
        assert!(TransferStatus::Pending.counts_as_used());
        assert!(TransferStatus::Processing.counts_as_used());
        assert!(TransferStatus::Success.counts_as_used());
        assert!(!TransferStatus::Failed.counts_as_used());
        assert!(!TransferStatus::Refunded.counts_as_used());
    }

    #[test]
    fn test_transaction_type_parsing_and_direction() {
        for (ty, s) in [
            (TransactionType::Load, "load"),
            (TransactionType::Debit, "debit"),
            (TransactionType::ExternalTransfer, "external_transfer"),
            (TransactionType::Refund, "refund"),
        ] {
            assert_eq!(TransactionType::from_str(s).unwrap(), ty);
        }
        assert!(TransactionType::Debit.is_outbound());
        assert!(TransactionType::ExternalTransfer.is_outbound());
        assert!(!TransactionType::Refund.is_outbound());
    }

    #[test]
    fn test_new_wallet_defaults() {
        let wallet = Wallet::new("w1".to_string(), "u1".to_string());
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.currency, "INR");
        assert!(wallet.is_active());
        assert_eq!(wallet.limits, SpendingLimits::default());
    }

    #[test]
    fn test_page_math() {
        let params = PageParams {
            page: 3,
            per_page: 10,
        };
        assert_eq!(params.offset(), 20);
        let page: Page<TransferView> = Page::new(vec![], &params, 21);
        assert_eq!(page.total_pages, 3);
        let empty: Page<TransferView> = Page::new(vec![], &params, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_page_offset_saturates() {
        let params = PageParams {
            page: i64::MAX,
            per_page: 100,
        };
        assert_eq!(params.offset(), i64::MAX);
        assert!(params.validate().is_err());

        let params = PageParams {
            page: 1_000_000,
            per_page: 100,
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.offset(), 99_999_900);
    }

    #[test]
    fn test_create_request_validation() {
        let req = CreateTransferRequest::new(Decimal::from(100), RecipientType::Upi, "user@bank");
        assert!(req.validate().is_ok());

        let req = CreateTransferRequest::new(Decimal::from(100), RecipientType::Upi, "");
        assert!(req.validate().is_err());

        let req = CreateTransferRequest::new(Decimal::from(100), RecipientType::Upi, "user@bank")
            .with_idempotency_key("");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(TransferSummary::rate(0, 0), 0.0);
        assert_eq!(TransferSummary::rate(3, 1), 75.0);
        assert_eq!(TransferSummary::rate(2, 1), 66.67);
    }

    #[test]
    fn test_health_response_degrades_on_provider_outage() {
        let health = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(health.status, HealthStatus::Degraded);
        let health = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
