//! Domain traits defining contracts for persistence and the payout provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::{AppError, LimitExceeded, LimitKind, SettlementError};
use super::recipient::RecipientType;
use super::types::{
    ExternalTransfer, Page, PageParams, SpendingLimits, Transaction, TransferChannel,
    TransferFilters, TransferStatus, TransferSummary, Wallet, WalletStatus,
};

/// A windowed spending limit, re-checked inside the reservation transaction
#[derive(Debug, Clone, PartialEq)]
pub struct WindowLimit {
    pub kind: LimitKind,
    pub limit: Decimal,
    /// Start of the window (inclusive)
    pub since: DateTime<Utc>,
    /// Count only assistant-initiated transfers
    pub assistant_only: bool,
}

impl WindowLimit {
    /// Reject when `used + requested` crosses the limit
    pub fn check(&self, used: Decimal, requested: Decimal) -> Result<(), LimitExceeded> {
        if used + requested > self.limit {
            return Err(LimitExceeded {
                kind: self.kind,
                limit: self.limit,
                used,
                requested,
            });
        }
        Ok(())
    }
}

/// Limits a debit must fit under once the wallet row is locked
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitGuard {
    pub windows: Vec<WindowLimit>,
}

/// Everything needed to reserve funds and record a transfer in one unit
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub transfer_id: String,
    pub transaction_id: String,
    pub reference_id: String,
    pub transaction_reference_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub total_amount: Decimal,
    pub recipient_type: RecipientType,
    pub recipient_value: String,
    pub recipient_name: Option<String>,
    pub description: Option<String>,
    pub channel: TransferChannel,
    pub idempotency_key: Option<String>,
    pub max_retries: i32,
    pub guard: LimitGuard,
}

/// A gateway-confirmed credit
#[derive(Debug, Clone)]
pub struct NewLoad {
    pub transaction_id: String,
    pub reference_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
}

/// An internal spend
#[derive(Debug, Clone)]
pub struct NewDebit {
    pub transaction_id: String,
    pub reference_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub guard: LimitGuard,
}

/// Terminal outcome reported by the payout provider (or the poll timeout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Success,
    Failed,
    Cancelled,
    /// Bank-initiated reversal before we saw a success
    Reversed,
}

impl SettlementOutcome {
    /// Terminal transfer status this outcome produces
    pub fn transfer_status(&self) -> TransferStatus {
        match self {
            Self::Success => TransferStatus::Success,
            Self::Failed => TransferStatus::Failed,
            Self::Cancelled => TransferStatus::Cancelled,
            Self::Reversed => TransferStatus::Refunded,
        }
    }

    /// Whether the reserved total goes back to the wallet
    pub fn requires_refund(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Instruction to drive a transfer to a terminal state
#[derive(Debug, Clone)]
pub struct FinalizeCommand {
    pub transfer_id: String,
    pub outcome: SettlementOutcome,
    pub reason: Option<String>,
    /// Pre-generated ids for the compensating entry, used only when refunding
    pub refund_transaction_id: String,
    pub refund_reference_id: String,
}

/// Result of a finalize attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeResult {
    /// This call moved the transfer to its terminal state
    Applied(ExternalTransfer),
    /// The transfer was already terminal; nothing changed
    AlreadyTerminal(ExternalTransfer),
}

impl FinalizeResult {
    pub fn transfer(&self) -> &ExternalTransfer {
        match self {
            Self::Applied(t) | Self::AlreadyTerminal(t) => t,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Owner of the mutable balance
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Open the single wallet for a user
    async fn create_wallet(&self, wallet_id: &str, user_id: &str) -> Result<Wallet, AppError>;

    /// Fetch a wallet, failing with `WalletError::NotFound`
    async fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, AppError>;

    async fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>, AppError>;

    /// Atomically decrement the balance if it covers `amount`.
    /// Returns the new balance.
    async fn reserve(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError>;

    /// Atomically increment the balance. Returns the new balance.
    async fn release(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError>;

    async fn set_wallet_status(
        &self,
        wallet_id: &str,
        status: WalletStatus,
    ) -> Result<Wallet, AppError>;

    async fn update_limits(
        &self,
        wallet_id: &str,
        limits: &SpendingLimits,
    ) -> Result<Wallet, AppError>;
}

/// Append-only transaction ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Credit the wallet and append a successful `load` entry
    async fn record_load(&self, load: &NewLoad) -> Result<Transaction, AppError>;

    /// Reserve funds and append a successful `debit` entry
    async fn record_debit(&self, debit: &NewDebit) -> Result<Transaction, AppError>;

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError>;

    /// Newest first
    async fn list_transactions(
        &self,
        wallet_id: &str,
        page: &PageParams,
    ) -> Result<Page<Transaction>, AppError>;

    /// Every entry for a wallet in creation order
    async fn ledger_entries(&self, wallet_id: &str) -> Result<Vec<Transaction>, AppError>;

    /// Outbound amount counted against limits since `since`: in-flight and
    /// successful transfer totals plus successful debits.
    async fn outbound_usage(
        &self,
        wallet_id: &str,
        since: DateTime<Utc>,
        assistant_only: bool,
    ) -> Result<Decimal, AppError>;
}

/// External transfer records and their state machine
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Reserve `total_amount`, insert the transfer and its ledger entry, all or nothing
    async fn create_transfer(&self, transfer: &NewTransfer) -> Result<ExternalTransfer, AppError>;

    async fn get_transfer(&self, id: &str) -> Result<Option<ExternalTransfer>, AppError>;

    async fn get_transfer_by_idempotency_key(
        &self,
        wallet_id: &str,
        key: &str,
    ) -> Result<Option<ExternalTransfer>, AppError>;

    async fn get_transfer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError>;

    async fn get_transfer_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError>;

    /// Newest first, with the total number of matches
    async fn list_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<(Vec<ExternalTransfer>, i64), AppError>;

    async fn summarize_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<TransferSummary, AppError>;

    /// `pending -> processing`. Returns false if the transfer was not pending.
    async fn mark_processing(
        &self,
        id: &str,
        external_id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Count a failed submission attempt on a pending transfer.
    /// Returns the new retry count.
    async fn record_submission_failure(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i32, AppError>;

    /// Push back the next worker visit for an in-flight transfer
    async fn schedule_next_attempt(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Move a non-terminal transfer to its terminal state, updating the linked
    /// entry and, when required, releasing funds with a `refund` entry.
    /// A no-op returning `AlreadyTerminal` when the transfer is already terminal.
    async fn finalize_transfer(&self, command: &FinalizeCommand)
    -> Result<FinalizeResult, AppError>;

    /// In-flight transfers whose next visit is due, oldest first
    async fn due_transfers(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExternalTransfer>, AppError>;
}

/// The full persistence surface
#[async_trait]
pub trait DatabaseClient: WalletStore + LedgerStore + TransferStore {
    async fn health_check(&self) -> Result<(), AppError>;
}

/// Outbound payout creation request
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    /// Our transfer reference; the provider rejects duplicates
    pub reference_id: String,
    pub amount: Decimal,
    pub recipient_type: RecipientType,
    pub recipient_value: String,
    pub recipient_name: Option<String>,
    pub narration: Option<String>,
}

impl PayoutRequest {
    #[must_use]
    pub fn for_transfer(transfer: &ExternalTransfer) -> Self {
        Self {
            reference_id: transfer.reference_id.clone(),
            amount: transfer.amount,
            recipient_type: transfer.recipient_type,
            recipient_value: transfer.recipient_value.clone(),
            recipient_name: transfer.recipient_name.clone(),
            narration: transfer.description.clone(),
        }
    }
}

/// Provider-side payout status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutStatus {
    /// Queued or processing at the provider
    InFlight,
    Processed,
    Failed(Option<String>),
    Cancelled(Option<String>),
    Reversed(Option<String>),
}

impl PayoutStatus {
    /// Terminal outcome, or `None` while still in flight
    pub fn outcome(&self) -> Option<(SettlementOutcome, Option<String>)> {
        match self {
            Self::InFlight => None,
            Self::Processed => Some((SettlementOutcome::Success, None)),
            Self::Failed(r) => Some((SettlementOutcome::Failed, r.clone())),
            Self::Cancelled(r) => Some((SettlementOutcome::Cancelled, r.clone())),
            Self::Reversed(r) => Some((SettlementOutcome::Reversed, r.clone())),
        }
    }
}

/// Authenticated status push from the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutNotification {
    pub external_id: String,
    /// Our transfer reference, echoed back by the provider
    pub reference_id: Option<String>,
    pub status: PayoutStatus,
}

/// Third-party payout provider: unreliable and asynchronous
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Check provider connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Create a payout and return the provider's payout id.
    /// Safe to repeat with the same reference.
    async fn create_payout(&self, request: &PayoutRequest) -> Result<String, SettlementError>;

    /// Current status of a payout
    async fn get_payout_status(&self, external_id: &str) -> Result<PayoutStatus, SettlementError>;

    /// Look up a payout by our reference
    async fn find_payout_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<String>, SettlementError> {
        let _ = reference_id;
        Ok(None)
    }
}
