//! Application service layer: wallet ledger operations and transfer orchestration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::domain::{
    AppError, CreateTransferRequest, CreateTransferResponse, DatabaseClient, DatabaseError,
    ExternalTransfer, HealthResponse, HealthStatus, LimitExceeded, LimitGuard, LoadWalletRequest,
    NewDebit, NewLoad, NewTransfer, Page, PageParams, PayoutProvider, ReferenceKind,
    SpendRequest, SpendingLimits, Transaction, TransactionStatus, TransactionType,
    TransferChannel, TransferFilters, TransferList, TransferPolicy, TransferValidation,
    TransferView, ValidateTransferRequest, ValidationError, Wallet, WalletError, WalletStatus,
    generate_reference, new_id, recipient,
};

use super::limits::LimitEnforcer;
use super::settlement::SettlementConfig;
use super::worker::SettlementQueue;

/// A rule a prospective transfer breaks
#[derive(Debug, Clone, PartialEq)]
enum TransferViolation {
    Recipient(String),
    Amount(String),
    WalletNotActive(WalletStatus),
    InsufficientFunds { available: Decimal, required: Decimal },
    Limit(LimitExceeded),
}

impl TransferViolation {
    fn message(&self) -> String {
        match self {
            Self::Recipient(msg) | Self::Amount(msg) => msg.clone(),
            Self::WalletNotActive(status) => format!("Wallet is {}", status),
            Self::InsufficientFunds {
                available,
                required,
            } => format!(
                "Insufficient balance: available ₹{}, required ₹{}",
                available, required
            ),
            Self::Limit(exceeded) => exceeded.to_string(),
        }
    }

    fn into_error(self, wallet_id: &str) -> AppError {
        match self {
            Self::Recipient(message) => AppError::Validation(ValidationError::InvalidField {
                field: "recipient_value".to_string(),
                message,
            }),
            Self::Amount(message) => AppError::Validation(ValidationError::InvalidField {
                field: "amount".to_string(),
                message,
            }),
            Self::WalletNotActive(status) => AppError::Wallet(WalletError::NotActive {
                wallet_id: wallet_id.to_string(),
                status: status.to_string(),
            }),
            Self::InsufficientFunds {
                available,
                required,
            } => AppError::Wallet(WalletError::InsufficientFunds {
                available,
                required,
            }),
            Self::Limit(exceeded) => AppError::LimitExceeded(exceeded),
        }
    }
}

/// Result of running the transfer rules once
#[derive(Debug, Clone)]
struct TransferCheck {
    violations: Vec<TransferViolation>,
    warnings: Vec<String>,
    fee: Decimal,
    total: Decimal,
    estimated_time: &'static str,
    recipient: Option<String>,
    guard: LimitGuard,
}

impl TransferCheck {
    fn to_validation(&self) -> TransferValidation {
        TransferValidation {
            valid: self.violations.is_empty(),
            errors: self.violations.iter().map(TransferViolation::message).collect(),
            warnings: self.warnings.clone(),
            fee: self.fee,
            total: self.total,
            estimated_time: self.estimated_time.to_string(),
        }
    }
}

/// Replay of a wallet's ledger against its stored balance
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct LedgerReplay {
    pub wallet_id: String,
    pub entries: usize,
    /// Sum of `balance_after` deltas over successful entries, in creation order
    #[schema(value_type = String)]
    pub replayed_balance: Decimal,
    /// Signed sum of every reservation, debit, load and refund
    #[schema(value_type = String)]
    pub movement_balance: Decimal,
    #[schema(value_type = String)]
    pub current_balance: Decimal,
    /// Reservations still awaiting a provider outcome
    pub in_flight: usize,
}

impl LedgerReplay {
    pub fn is_balanced(&self) -> bool {
        self.replayed_balance == self.current_balance
            && self.movement_balance == self.current_balance
    }
}

/// Application service containing business logic
pub struct AppService {
    pub(super) db_client: Arc<dyn DatabaseClient>,
    pub(super) payout_provider: Arc<dyn PayoutProvider>,
    policy: TransferPolicy,
    limits: LimitEnforcer,
    pub(super) settlement: SettlementConfig,
    pub(super) queue: Option<SettlementQueue>,
}

impl AppService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        payout_provider: Arc<dyn PayoutProvider>,
    ) -> Self {
        Self::with_config(
            db_client,
            payout_provider,
            TransferPolicy::default(),
            LimitEnforcer::default(),
            SettlementConfig::default(),
        )
    }

    #[must_use]
    pub fn with_config(
        db_client: Arc<dyn DatabaseClient>,
        payout_provider: Arc<dyn PayoutProvider>,
        policy: TransferPolicy,
        limits: LimitEnforcer,
        settlement: SettlementConfig,
    ) -> Self {
        Self {
            db_client,
            payout_provider,
            policy,
            limits,
            settlement,
            queue: None,
        }
    }

    /// Hand freshly created transfers straight to the settlement workers
    #[must_use]
    pub fn with_queue(mut self, queue: SettlementQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    pub fn db_client(&self) -> Arc<dyn DatabaseClient> {
        Arc::clone(&self.db_client)
    }

    pub fn payout_provider(&self) -> Arc<dyn PayoutProvider> {
        Arc::clone(&self.payout_provider)
    }

    // ----- Wallets -----

    /// Open a wallet for a user. One wallet per user.
    #[instrument(skip(self))]
    pub async fn create_wallet(&self, user_id: &str) -> Result<Wallet, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "user_id".to_string(),
            )));
        }
        if self.db_client.get_wallet_by_user(user_id).await?.is_some() {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "wallet already exists for user {}",
                user_id
            ))));
        }
        let wallet = self.db_client.create_wallet(&new_id(), user_id).await?;
        info!(wallet_id = %wallet.id, "Wallet created");
        Ok(wallet)
    }

    #[instrument(skip(self))]
    pub async fn get_wallet_for_user(&self, user_id: &str) -> Result<Wallet, AppError> {
        self.db_client
            .get_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::Wallet(WalletError::NotFound(format!("user {}", user_id))))
    }

    #[instrument(skip(self))]
    pub async fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, AppError> {
        self.db_client.get_wallet(wallet_id).await
    }

    #[instrument(skip(self))]
    pub async fn set_wallet_status(
        &self,
        wallet_id: &str,
        status: WalletStatus,
    ) -> Result<Wallet, AppError> {
        let wallet = self.db_client.set_wallet_status(wallet_id, status).await?;
        info!(wallet_id = %wallet_id, status = %status, "Wallet status changed");
        Ok(wallet)
    }

    #[instrument(skip(self, limits))]
    pub async fn update_limits(
        &self,
        wallet_id: &str,
        limits: &SpendingLimits,
    ) -> Result<Wallet, AppError> {
        let values = [
            limits.daily_limit,
            limits.monthly_limit,
            limits.per_transaction_limit,
            limits.ai_daily_limit,
            limits.ai_per_transaction_limit,
        ];
        if values.iter().any(|v| v.is_sign_negative()) {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "limits".to_string(),
                message: "Limits must not be negative".to_string(),
            }));
        }
        self.db_client.update_limits(wallet_id, limits).await
    }

    /// Credit a wallet after the payment gateway confirmed a payment.
    /// A gateway payment id is credited at most once.
    #[instrument(skip(self, request), fields(payment_id = %request.gateway_payment_id))]
    pub async fn load_wallet(
        &self,
        wallet_id: &str,
        request: &LoadWalletRequest,
    ) -> Result<Transaction, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        check_money("amount", request.amount)?;

        let load = NewLoad {
            transaction_id: new_id(),
            reference_id: generate_reference(ReferenceKind::Load),
            wallet_id: wallet_id.to_string(),
            amount: request.amount,
            gateway_order_id: request.gateway_order_id.clone(),
            gateway_payment_id: request.gateway_payment_id.clone(),
        };
        let txn = self.db_client.record_load(&load).await?;
        info!(wallet_id = %wallet_id, amount = %txn.amount, balance = %txn.balance_after, "Wallet loaded");
        Ok(txn)
    }

    /// Internal spend, subject to the same windowed limits as transfers
    #[instrument(skip(self, request))]
    pub async fn spend(
        &self,
        wallet_id: &str,
        request: &SpendRequest,
    ) -> Result<Transaction, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        check_money("amount", request.amount)?;

        let wallet = self.db_client.get_wallet(wallet_id).await?;
        if !wallet.is_active() {
            return Err(TransferViolation::WalletNotActive(wallet.status).into_error(wallet_id));
        }
        let assessment = self
            .limits
            .assess(
                self.db_client.as_ref(),
                &wallet,
                request.amount,
                request.amount,
                TransferChannel::Direct,
                Utc::now(),
            )
            .await?;
        if let Some(exceeded) = assessment.violations.into_iter().next() {
            warn!(wallet_id = %wallet_id, limit = %exceeded.kind, "Spend rejected by limit");
            return Err(AppError::LimitExceeded(exceeded));
        }

        let debit = NewDebit {
            transaction_id: new_id(),
            reference_id: generate_reference(ReferenceKind::Debit),
            wallet_id: wallet_id.to_string(),
            amount: request.amount,
            description: request.description.clone(),
            guard: assessment.guard,
        };
        let txn = self.db_client.record_debit(&debit).await?;
        info!(wallet_id = %wallet_id, amount = %txn.amount, balance = %txn.balance_after, "Wallet debited");
        Ok(txn)
    }

    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        wallet_id: &str,
        page: &PageParams,
    ) -> Result<Page<Transaction>, AppError> {
        page.validate()
            .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
        self.db_client.list_transactions(wallet_id, page).await
    }

    /// Rebuild the balance from the ledger and compare it with the stored one
    #[instrument(skip(self))]
    pub async fn ledger_replay(&self, wallet_id: &str) -> Result<LedgerReplay, AppError> {
        let wallet = self.db_client.get_wallet(wallet_id).await?;
        let entries = self.db_client.ledger_entries(wallet_id).await?;

        let mut replayed = Decimal::ZERO;
        let mut previous = Decimal::ZERO;
        let mut movement = Decimal::ZERO;
        let mut in_flight = 0;

        for entry in &entries {
            if entry.status == TransactionStatus::Success {
                replayed += entry.balance_after - previous;
                previous = entry.balance_after;
            }
            match entry.transaction_type {
                // Reservations moved money whatever their final status
                TransactionType::ExternalTransfer => {
                    movement -= entry.amount;
                    if entry.status == TransactionStatus::Pending {
                        in_flight += 1;
                    }
                }
                TransactionType::Debit if entry.status == TransactionStatus::Success => {
                    movement -= entry.amount;
                }
                TransactionType::Load | TransactionType::Refund
                    if entry.status == TransactionStatus::Success =>
                {
                    movement += entry.amount;
                }
                _ => {}
            }
        }

        let replay = LedgerReplay {
            wallet_id: wallet_id.to_string(),
            entries: entries.len(),
            replayed_balance: replayed,
            movement_balance: movement,
            current_balance: wallet.balance,
            in_flight,
        };
        if !replay.is_balanced() && in_flight == 0 {
            warn!(
                wallet_id = %wallet_id,
                replayed = %replay.replayed_balance,
                movement = %replay.movement_balance,
                current = %replay.current_balance,
                "Ledger replay does not match wallet balance"
            );
        }
        Ok(replay)
    }

    // ----- Transfers -----

    /// Dry-run the transfer rules without touching any state
    #[instrument(skip(self, request), fields(recipient_type = %request.recipient_type))]
    pub async fn validate_transfer(
        &self,
        wallet_id: &str,
        request: &ValidateTransferRequest,
    ) -> Result<TransferValidation, AppError> {
        let wallet = self.db_client.get_wallet(wallet_id).await?;
        let check = self.check_transfer(&wallet, request, Utc::now()).await?;
        Ok(check.to_validation())
    }

    /// Reserve funds and record a pending transfer in one atomic step.
    /// The payout itself is submitted by the settlement workers.
    #[instrument(skip(self, request), fields(recipient_type = %request.recipient_type, amount = %request.amount))]
    pub async fn create_transfer(
        &self,
        wallet_id: &str,
        request: &CreateTransferRequest,
    ) -> Result<CreateTransferResponse, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self
                .db_client
                .get_transfer_by_idempotency_key(wallet_id, key)
                .await?
            {
                info!(id = %existing.id, "Idempotent replay of transfer creation");
                return Ok(self.creation_response(&existing));
            }
        }

        let wallet = self.db_client.get_wallet(wallet_id).await?;
        let mut check = self
            .check_transfer(&wallet, &request.as_validation(), Utc::now())
            .await?;
        if !check.violations.is_empty() {
            let violation = check.violations.swap_remove(0);
            warn!(wallet_id = %wallet_id, reason = %violation.message(), "Transfer rejected");
            return Err(violation.into_error(wallet_id));
        }
        let recipient_value = check.recipient.take().ok_or_else(|| {
            AppError::Internal("recipient passed validation without a normalized value".to_string())
        })?;

        let new_transfer = NewTransfer {
            transfer_id: new_id(),
            transaction_id: new_id(),
            reference_id: generate_reference(ReferenceKind::Transfer),
            transaction_reference_id: generate_reference(ReferenceKind::Transaction),
            wallet_id: wallet_id.to_string(),
            amount: request.amount,
            fee: check.fee,
            total_amount: check.total,
            recipient_type: request.recipient_type,
            recipient_value,
            recipient_name: trimmed(request.recipient_name.as_deref()),
            description: trimmed(request.description.as_deref()),
            channel: request.channel,
            idempotency_key: request.idempotency_key.clone(),
            max_retries: self.settlement.max_retries,
            guard: check.guard,
        };

        let transfer = match self.db_client.create_transfer(&new_transfer).await {
            Ok(transfer) => transfer,
            // A concurrent request with the same key won the insert
            Err(AppError::Database(DatabaseError::Duplicate(_)))
                if new_transfer.idempotency_key.is_some() =>
            {
                let key = new_transfer.idempotency_key.as_deref().unwrap_or_default();
                self.db_client
                    .get_transfer_by_idempotency_key(wallet_id, key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Database(DatabaseError::Duplicate(format!(
                            "idempotency key {}",
                            key
                        )))
                    })?
            }
            Err(e) => return Err(e),
        };

        info!(
            id = %transfer.id,
            reference = %transfer.reference_id,
            total = %transfer.total_amount,
            balance_after = %transfer.balance_after,
            "Transfer accepted for settlement"
        );

        if let Some(queue) = &self.queue {
            queue.enqueue(&transfer.id);
        }

        Ok(self.creation_response(&transfer))
    }

    /// A transfer owned by the wallet. Other wallets' transfers read as not found.
    #[instrument(skip(self))]
    pub async fn get_transfer(&self, wallet_id: &str, id: &str) -> Result<TransferView, AppError> {
        self.db_client
            .get_transfer(id)
            .await?
            .filter(|t| t.wallet_id == wallet_id)
            .map(|t| TransferView::from(&t))
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("transfer {}", id))))
    }

    #[instrument(skip(self, filters))]
    pub async fn list_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<TransferList, AppError> {
        filters
            .validate()
            .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
        if let (Some(from), Some(to)) = (filters.from, filters.to) {
            if from >= to {
                return Err(AppError::Validation(ValidationError::InvalidField {
                    field: "from".to_string(),
                    message: "must be earlier than 'to'".to_string(),
                }));
            }
        }

        let (transfers, total) = self.db_client.list_transfers(wallet_id, filters).await?;
        let summary = self
            .db_client
            .summarize_transfers(wallet_id, filters)
            .await?;
        let views = transfers.iter().map(TransferView::from).collect();

        Ok(TransferList {
            transfers: Page::new(views, &filters.page_params(), total),
            summary,
        })
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let payout_health = match self.payout_provider.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(db_health, payout_health)
    }

    /// The single rule set behind both validation and creation
    async fn check_transfer(
        &self,
        wallet: &Wallet,
        request: &ValidateTransferRequest,
        now: DateTime<Utc>,
    ) -> Result<TransferCheck, AppError> {
        let fee = self.policy.fee_for(request.recipient_type);
        let total = self.policy.total_for(request.amount, request.recipient_type);
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        let recipient = match recipient::validate(request.recipient_type, &request.recipient_value)
        {
            Ok(normalized) => Some(normalized),
            Err(msg) => {
                violations.push(TransferViolation::Recipient(msg));
                None
            }
        };

        let amount_ok = match self.policy.check_amount(request.amount) {
            Ok(()) => true,
            Err(msg) => {
                violations.push(TransferViolation::Amount(msg));
                false
            }
        };

        if !wallet.is_active() {
            violations.push(TransferViolation::WalletNotActive(wallet.status));
        }

        if wallet.balance < total {
            violations.push(TransferViolation::InsufficientFunds {
                available: wallet.balance,
                required: total,
            });
        }

        let assessment = self
            .limits
            .assess(
                self.db_client.as_ref(),
                wallet,
                request.amount,
                total,
                request.channel,
                now,
            )
            .await?;
        if amount_ok && !assessment.is_within_limits() {
            violations.extend(
                assessment
                    .violations
                    .iter()
                    .cloned()
                    .map(TransferViolation::Limit),
            );
        }

        if amount_ok {
            let remaining = assessment.daily_remaining;
            if remaining > Decimal::ZERO
                && total <= remaining
                && total > remaining * self.policy.daily_usage_warning_ratio
            {
                warnings.push(format!(
                    "This transfer uses more than {}% of your remaining daily limit (₹{})",
                    (self.policy.daily_usage_warning_ratio * Decimal::from(100)).normalize(),
                    remaining
                ));
            }
            let balance_after = wallet.balance - total;
            if balance_after >= Decimal::ZERO && balance_after < self.policy.low_balance_threshold {
                warnings.push(format!(
                    "Your balance will be ₹{} after this transfer",
                    balance_after
                ));
            }
            if request.amount >= self.policy.large_transfer_threshold {
                warnings.push(
                    "Large transfer: please double-check the recipient before confirming"
                        .to_string(),
                );
            }
        }

        Ok(TransferCheck {
            violations,
            warnings,
            fee,
            total,
            estimated_time: self.policy.estimated_time(request.recipient_type),
            recipient,
            guard: assessment.guard,
        })
    }

    fn creation_response(&self, transfer: &ExternalTransfer) -> CreateTransferResponse {
        CreateTransferResponse {
            id: transfer.id.clone(),
            reference_id: transfer.reference_id.clone(),
            fee: transfer.fee,
            total: transfer.total_amount,
            status: transfer.status,
            estimated_time: self
                .policy
                .estimated_time(transfer.recipient_type)
                .to_string(),
        }
    }
}

/// Positive, at most two decimal places
fn check_money(field: &str, amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > 2 {
        return Err(AppError::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            message: "must be a positive amount with at most 2 decimal places".to_string(),
        }));
    }
    Ok(())
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_money() {
        assert!(check_money("amount", Decimal::new(1050, 2)).is_ok());
        assert!(check_money("amount", Decimal::ZERO).is_err());
        assert!(check_money("amount", Decimal::from(-1)).is_err());
        assert!(check_money("amount", Decimal::new(1001, 3)).is_err());
    }

    #[test]
    fn test_violation_maps_to_typed_error() {
        let err = TransferViolation::InsufficientFunds {
            available: Decimal::from(898),
            required: Decimal::from(2002),
        }
        .into_error("w1");
        assert!(matches!(
            err,
            AppError::Wallet(WalletError::InsufficientFunds { .. })
        ));

        let err = TransferViolation::Recipient("Invalid UPI ID format".to_string()).into_error("w1");
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::InvalidField { ref field, .. }) if field == "recipient_value"
        ));
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Some("  Asha ")), Some("Asha".to_string()));
        assert_eq!(trimmed(Some("   ")), None);
        assert_eq!(trimmed(None), None);
    }
}
