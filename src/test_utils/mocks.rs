//! Mock implementations for testing.
//!
//! [`MockDatabaseClient`] keeps all state behind one mutex, so every trait
//! call is atomic the same way a database transaction is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::{
    AppError, DatabaseClient, DatabaseError, ExternalTransfer, FinalizeCommand, FinalizeResult,
    LedgerStore, LimitGuard, NewDebit, NewLoad, NewTransfer, Page, PageParams, PayoutProvider,
    PayoutRequest, PayoutStatus, SettlementError, SettlementOutcome, SpendingLimits, Transaction,
    TransactionStatus, TransactionType, TransferChannel, TransferFilters, TransferStatus,
    TransferStore, TransferSummary, Wallet, WalletError, WalletStatus, WalletStore,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<String, Wallet>,
    /// Creation order
    transactions: Vec<Transaction>,
    transfers: HashMap<String, ExternalTransfer>,
}

fn duplicate(constraint: &str) -> AppError {
    AppError::Database(DatabaseError::Duplicate(constraint.to_string()))
}

fn transfer_not_found(id: &str) -> AppError {
    AppError::Database(DatabaseError::NotFound(format!("transfer {}", id)))
}

impl LedgerState {
    fn wallet(&self, wallet_id: &str) -> Result<&Wallet, AppError> {
        self.wallets
            .get(wallet_id)
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()).into())
    }

    fn active_wallet(&self, wallet_id: &str) -> Result<&Wallet, AppError> {
        let wallet = self.wallet(wallet_id)?;
        if !wallet.is_active() {
            return Err(WalletError::NotActive {
                wallet_id: wallet_id.to_string(),
                status: wallet.status.to_string(),
            }
            .into());
        }
        Ok(wallet)
    }

    /// Balance after debiting `amount`, without applying it
    fn check_debit(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError> {
        let wallet = self.active_wallet(wallet_id)?;
        if wallet.balance < amount {
            return Err(WalletError::InsufficientFunds {
                available: wallet.balance,
                required: amount,
            }
            .into());
        }
        Ok(wallet.balance - amount)
    }

    fn set_balance(&mut self, wallet_id: &str, balance: Decimal) {
        if let Some(wallet) = self.wallets.get_mut(wallet_id) {
            wallet.balance = balance;
            wallet.updated_at = Utc::now();
        }
    }

    fn usage(&self, wallet_id: &str, since: DateTime<Utc>, assistant_only: bool) -> Decimal {
        let transfers: Decimal = self
            .transfers
            .values()
            .filter(|t| {
                t.wallet_id == wallet_id
                    && t.created_at >= since
                    && t.status.counts_as_used()
                    && (!assistant_only || t.channel == TransferChannel::Assistant)
            })
            .map(|t| t.total_amount)
            .sum();
        if assistant_only {
            return transfers;
        }
        let debits: Decimal = self
            .transactions
            .iter()
            .filter(|t| {
                t.wallet_id == wallet_id
                    && t.created_at >= since
                    && t.transaction_type == TransactionType::Debit
                    && t.status == TransactionStatus::Success
            })
            .map(|t| t.amount)
            .sum();
        transfers + debits
    }

    fn enforce(
        &self,
        wallet_id: &str,
        guard: &LimitGuard,
        requested: Decimal,
    ) -> Result<(), AppError> {
        for window in &guard.windows {
            window.check(self.usage(wallet_id, window.since, window.assistant_only), requested)?;
        }
        Ok(())
    }

    fn check_reference(&self, reference_id: &str) -> Result<(), AppError> {
        if self
            .transactions
            .iter()
            .any(|t| t.reference_id == reference_id)
        {
            return Err(duplicate("transactions_reference_id_key"));
        }
        Ok(())
    }

    fn matches(transfer: &ExternalTransfer, wallet_id: &str, filters: &TransferFilters) -> bool {
        transfer.wallet_id == wallet_id
            && filters.status.is_none_or(|s| transfer.status == s)
            && filters
                .recipient_type
                .is_none_or(|r| transfer.recipient_type == r)
            && filters.from.is_none_or(|from| transfer.created_at >= from)
            && filters.to.is_none_or(|to| transfer.created_at < to)
    }
}

/// In-memory ledger store for testing
pub struct MockDatabaseClient {
    state: Arc<Mutex<LedgerState>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Current balance of a wallet (for testing)
    pub fn balance(&self, wallet_id: &str) -> Option<Decimal> {
        self.state
            .lock()
            .unwrap()
            .wallets
            .get(wallet_id)
            .map(|w| w.balance)
    }

    /// Every ledger entry in creation order (for testing)
    pub fn get_all_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    /// Every transfer, oldest first (for testing)
    pub fn get_all_transfers(&self) -> Vec<ExternalTransfer> {
        let mut transfers: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .transfers
            .values()
            .cloned()
            .collect();
        transfers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        transfers
    }

    /// Edit a stored transfer in place, e.g. to move its clock (for testing)
    pub fn update_transfer(&self, id: &str, update: impl FnOnce(&mut ExternalTransfer)) {
        if let Some(transfer) = self.state.lock().unwrap().transfers.get_mut(id) {
            update(transfer);
        }
    }

    /// Make a transfer due for its next settlement visit (for testing)
    pub fn make_due(&self, id: &str) {
        self.update_transfer(id, |t| {
            t.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
        });
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletStore for MockDatabaseClient {
    async fn create_wallet(&self, wallet_id: &str, user_id: &str) -> Result<Wallet, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        if state.wallets.values().any(|w| w.user_id == user_id) {
            return Err(duplicate("wallets_user_id_key"));
        }
        if state.wallets.contains_key(wallet_id) {
            return Err(duplicate("wallets_pkey"));
        }
        let wallet = Wallet::new(wallet_id.to_string(), user_id.to_string());
        state.wallets.insert(wallet.id.clone(), wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        state.wallet(wallet_id).cloned()
    }

    async fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state.wallets.values().find(|w| w.user_id == user_id).cloned())
    }

    async fn reserve(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let balance = state.check_debit(wallet_id, amount)?;
        state.set_balance(wallet_id, balance);
        Ok(balance)
    }

    async fn release(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let balance = state.active_wallet(wallet_id)?.balance + amount;
        state.set_balance(wallet_id, balance);
        Ok(balance)
    }

    async fn set_wallet_status(
        &self,
        wallet_id: &str,
        status: WalletStatus,
    ) -> Result<Wallet, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let wallet = state
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()))?;
        wallet.status = status;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn update_limits(
        &self,
        wallet_id: &str,
        limits: &SpendingLimits,
    ) -> Result<Wallet, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let wallet = state
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()))?;
        wallet.limits = *limits;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }
}

#[async_trait]
impl LedgerStore for MockDatabaseClient {
    async fn record_load(&self, load: &NewLoad) -> Result<Transaction, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let balance = state.active_wallet(&load.wallet_id)?.balance + load.amount;
        if state
            .transactions
            .iter()
            .any(|t| t.gateway_payment_id.as_deref() == Some(load.gateway_payment_id.as_str()))
        {
            return Err(duplicate("transactions_gateway_payment_id_key"));
        }
        state.check_reference(&load.reference_id)?;

        let now = Utc::now();
        let txn = Transaction {
            id: load.transaction_id.clone(),
            wallet_id: load.wallet_id.clone(),
            transaction_type: TransactionType::Load,
            amount: load.amount,
            balance_after: balance,
            status: TransactionStatus::Success,
            description: None,
            gateway_order_id: Some(load.gateway_order_id.clone()),
            gateway_payment_id: Some(load.gateway_payment_id.clone()),
            reference_id: load.reference_id.clone(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.set_balance(&load.wallet_id, balance);
        state.transactions.push(txn.clone());
        Ok(txn)
    }

    async fn record_debit(&self, debit: &NewDebit) -> Result<Transaction, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let balance = state.check_debit(&debit.wallet_id, debit.amount)?;
        state.enforce(&debit.wallet_id, &debit.guard, debit.amount)?;
        state.check_reference(&debit.reference_id)?;

        let now = Utc::now();
        let txn = Transaction {
            id: debit.transaction_id.clone(),
            wallet_id: debit.wallet_id.clone(),
            transaction_type: TransactionType::Debit,
            amount: debit.amount,
            balance_after: balance,
            status: TransactionStatus::Success,
            description: debit.description.clone(),
            gateway_order_id: None,
            gateway_payment_id: None,
            reference_id: debit.reference_id.clone(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.set_balance(&debit.wallet_id, balance);
        state.transactions.push(txn.clone());
        Ok(txn)
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: &str,
        page: &PageParams,
    ) -> Result<Page<Transaction>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        let entries: Vec<&Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.wallet_id == wallet_id)
            .collect();
        let total = entries.len() as i64;
        let items = entries
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn ledger_entries(&self, wallet_id: &str) -> Result<Vec<Transaction>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn outbound_usage(
        &self,
        wallet_id: &str,
        since: DateTime<Utc>,
        assistant_only: bool,
    ) -> Result<Decimal, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state.usage(wallet_id, since, assistant_only))
    }
}

#[async_trait]
impl TransferStore for MockDatabaseClient {
    async fn create_transfer(&self, transfer: &NewTransfer) -> Result<ExternalTransfer, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let balance_after = state.check_debit(&transfer.wallet_id, transfer.total_amount)?;
        state.enforce(&transfer.wallet_id, &transfer.guard, transfer.total_amount)?;
        state.check_reference(&transfer.transaction_reference_id)?;
        if state
            .transfers
            .values()
            .any(|t| t.reference_id == transfer.reference_id)
        {
            return Err(duplicate("external_transfers_reference_id_key"));
        }
        if let Some(key) = transfer.idempotency_key.as_deref() {
            if state.transfers.values().any(|t| {
                t.wallet_id == transfer.wallet_id && t.idempotency_key.as_deref() == Some(key)
            }) {
                return Err(duplicate("external_transfers_idempotency_key"));
            }
        }

        let now = Utc::now();
        state.transactions.push(Transaction {
            id: transfer.transaction_id.clone(),
            wallet_id: transfer.wallet_id.clone(),
            transaction_type: TransactionType::ExternalTransfer,
            amount: transfer.total_amount,
            balance_after,
            status: TransactionStatus::Pending,
            description: transfer.description.clone(),
            gateway_order_id: None,
            gateway_payment_id: None,
            reference_id: transfer.transaction_reference_id.clone(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        });
        let created = ExternalTransfer {
            id: transfer.transfer_id.clone(),
            wallet_id: transfer.wallet_id.clone(),
            amount: transfer.amount,
            fee: transfer.fee,
            total_amount: transfer.total_amount,
            recipient_type: transfer.recipient_type,
            recipient_value: transfer.recipient_value.clone(),
            recipient_name: transfer.recipient_name.clone(),
            description: transfer.description.clone(),
            channel: transfer.channel,
            status: TransferStatus::Pending,
            external_id: None,
            retry_count: 0,
            max_retries: transfer.max_retries,
            balance_before: balance_after + transfer.total_amount,
            balance_after,
            transaction_id: transfer.transaction_id.clone(),
            refund_transaction_id: None,
            reference_id: transfer.reference_id.clone(),
            idempotency_key: transfer.idempotency_key.clone(),
            failure_reason: None,
            next_attempt_at: Some(now),
            submitted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.set_balance(&transfer.wallet_id, balance_after);
        state.transfers.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_transfer(&self, id: &str) -> Result<Option<ExternalTransfer>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state.transfers.get(id).cloned())
    }

    async fn get_transfer_by_idempotency_key(
        &self,
        wallet_id: &str,
        key: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transfers
            .values()
            .find(|t| t.wallet_id == wallet_id && t.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn get_transfer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transfers
            .values()
            .find(|t| t.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_transfer_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transfers
            .values()
            .find(|t| t.reference_id == reference_id)
            .cloned())
    }

    async fn list_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<(Vec<ExternalTransfer>, i64), AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        let mut matching: Vec<ExternalTransfer> = state
            .transfers
            .values()
            .filter(|t| LedgerState::matches(t, wallet_id, filters))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matching.len() as i64;
        let page = filters.page_params();
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .collect();
        Ok((items, total))
    }

    async fn summarize_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<TransferSummary, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        let mut summary = TransferSummary::default();
        for t in state
            .transfers
            .values()
            .filter(|t| LedgerState::matches(t, wallet_id, filters))
        {
            summary.total_count += 1;
            match t.status {
                TransferStatus::Success => {
                    summary.success_count += 1;
                    summary.total_amount += t.amount;
                    summary.total_fees += t.fee;
                }
                TransferStatus::Pending | TransferStatus::Processing => summary.pending_count += 1,
                _ => summary.failed_count += 1,
            }
        }
        summary.success_rate = TransferSummary::rate(summary.success_count, summary.failed_count);
        Ok(summary)
    }

    async fn mark_processing(
        &self,
        id: &str,
        external_id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let Some(transfer) = state.transfers.get_mut(id) else {
            return Ok(false);
        };
        if transfer.status != TransferStatus::Pending {
            return Ok(false);
        }
        let now = Utc::now();
        transfer.status = TransferStatus::Processing;
        transfer.external_id = Some(external_id.to_string());
        transfer.submitted_at = Some(now);
        transfer.next_attempt_at = Some(next_attempt_at);
        transfer.failure_reason = None;
        transfer.updated_at = now;
        Ok(true)
    }

    async fn record_submission_failure(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let transfer = state
            .transfers
            .get_mut(id)
            .filter(|t| t.status == TransferStatus::Pending)
            .ok_or_else(|| transfer_not_found(id))?;
        transfer.retry_count += 1;
        transfer.failure_reason = Some(error.to_string());
        transfer.next_attempt_at = Some(next_attempt_at);
        transfer.updated_at = Utc::now();
        Ok(transfer.retry_count)
    }

    async fn schedule_next_attempt(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        if let Some(transfer) = state.transfers.get_mut(id) {
            if !transfer.status.is_terminal() {
                transfer.next_attempt_at = Some(next_attempt_at);
                transfer.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn finalize_transfer(
        &self,
        command: &FinalizeCommand,
    ) -> Result<FinalizeResult, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let transfer = state
            .transfers
            .get(&command.transfer_id)
            .cloned()
            .ok_or_else(|| transfer_not_found(&command.transfer_id))?;
        if transfer.status.is_terminal() {
            return Ok(FinalizeResult::AlreadyTerminal(transfer));
        }

        let refund_balance = if command.outcome.requires_refund() {
            state.check_reference(&command.refund_reference_id)?;
            Some(state.active_wallet(&transfer.wallet_id)?.balance + transfer.total_amount)
        } else {
            None
        };

        let now = Utc::now();
        let entry_status = match command.outcome {
            SettlementOutcome::Success => TransactionStatus::Success,
            SettlementOutcome::Cancelled => TransactionStatus::Cancelled,
            SettlementOutcome::Failed | SettlementOutcome::Reversed => TransactionStatus::Failed,
        };
        if let Some(entry) = state
            .transactions
            .iter_mut()
            .find(|t| t.id == transfer.transaction_id)
        {
            entry.status = entry_status;
            entry.failure_reason = command.reason.clone();
            entry.updated_at = now;
        }

        let mut refund_transaction_id = None;
        if let Some(balance) = refund_balance {
            state.set_balance(&transfer.wallet_id, balance);
            state.transactions.push(Transaction {
                id: command.refund_transaction_id.clone(),
                wallet_id: transfer.wallet_id.clone(),
                transaction_type: TransactionType::Refund,
                amount: transfer.total_amount,
                balance_after: balance,
                status: TransactionStatus::Success,
                description: Some(format!("Refund for transfer {}", transfer.reference_id)),
                gateway_order_id: None,
                gateway_payment_id: None,
                reference_id: command.refund_reference_id.clone(),
                failure_reason: None,
                created_at: now,
                updated_at: now,
            });
            refund_transaction_id = Some(command.refund_transaction_id.clone());
        }

        let stored = state
            .transfers
            .get_mut(&command.transfer_id)
            .ok_or_else(|| transfer_not_found(&command.transfer_id))?;
        stored.status = command.outcome.transfer_status();
        if command.reason.is_some() {
            stored.failure_reason = command.reason.clone();
        }
        stored.refund_transaction_id = refund_transaction_id;
        stored.completed_at = Some(now);
        stored.next_attempt_at = None;
        stored.updated_at = now;
        Ok(FinalizeResult::Applied(stored.clone()))
    }

    async fn due_transfers(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExternalTransfer>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        let mut due: Vec<ExternalTransfer> = state
            .transfers
            .values()
            .filter(|t| !t.status.is_terminal() && t.next_attempt_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(due.into_iter().take(limit.max(0) as usize).collect())
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }
}

/// Scriptable payout provider for testing.
///
/// Payout creation succeeds with `pout_<reference>` unless a result was
/// queued with [`MockPayoutProvider::push_create_result`]. Status checks
/// return what [`MockPayoutProvider::set_status`] recorded, else in-flight.
pub struct MockPayoutProvider {
    create_results: Mutex<VecDeque<Result<String, SettlementError>>>,
    statuses: Mutex<HashMap<String, Result<PayoutStatus, SettlementError>>>,
    by_reference: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<PayoutRequest>>,
    status_checks: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
}

impl MockPayoutProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            create_results: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            by_reference: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            status_checks: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Queue the result of the next `create_payout` call
    pub fn push_create_result(&self, result: Result<String, SettlementError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    /// Queue `count` transient failures
    pub fn fail_next_creates(&self, count: usize) {
        for _ in 0..count {
            self.push_create_result(Err(SettlementError::Transient(
                "provider unavailable".to_string(),
            )));
        }
    }

    pub fn set_status(&self, external_id: &str, status: PayoutStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(external_id.to_string(), Ok(status));
    }

    pub fn set_status_error(&self, external_id: &str, error: SettlementError) {
        self.statuses
            .lock()
            .unwrap()
            .insert(external_id.to_string(), Err(error));
    }

    /// Pretend a payout exists at the provider under `reference_id`
    pub fn register_payout(&self, reference_id: &str, external_id: &str) {
        self.by_reference
            .lock()
            .unwrap()
            .insert(reference_id.to_string(), external_id.to_string());
    }

    /// Every `create_payout` request received
    pub fn requests(&self) -> Vec<PayoutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.lock().unwrap().len()
    }
}

impl Default for MockPayoutProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PayoutProvider for MockPayoutProvider {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Settlement(SettlementError::Transient(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn create_payout(&self, request: &PayoutRequest) -> Result<String, SettlementError> {
        self.requests.lock().unwrap().push(request.clone());
        let result = self
            .create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("pout_{}", request.reference_id)));
        if let Ok(id) = &result {
            self.register_payout(&request.reference_id, id);
        }
        result
    }

    async fn get_payout_status(&self, external_id: &str) -> Result<PayoutStatus, SettlementError> {
        self.status_checks
            .lock()
            .unwrap()
            .push(external_id.to_string());
        self.statuses
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or(Ok(PayoutStatus::InFlight))
    }

    async fn find_payout_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<String>, SettlementError> {
        Ok(self.by_reference.lock().unwrap().get(reference_id).cloned())
    }
}
