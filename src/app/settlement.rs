//! Settlement and reconciliation: drives transfers from `pending` to a terminal state.
//!
//! Submission, status polling and provider webhooks all converge on
//! [`AppService::finalize`], which is a no-op for transfers already terminal.

use chrono::{Duration, Utc};
use rand::Rng;
use std::env;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, ConfigError, ExternalTransfer, FinalizeCommand, FinalizeResult, PayoutNotification,
    PayoutRequest, ReferenceKind, SettlementOutcome, TransferStatus, generate_reference, new_id,
};

use super::service::AppService;

/// Maximum backoff duration in seconds (5 minutes)
const MAX_BACKOFF_SECS: i64 = 300;

/// Timing and retry policy for the settlement path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Seconds between status checks of an in-flight payout
    pub poll_interval_secs: i64,
    /// Seconds after submission before an unconfirmed payout is failed and refunded
    pub poll_timeout_secs: i64,
    /// Retries of the payout creation call before the transfer fails
    pub max_retries: i32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            poll_timeout_secs: 600,
            max_retries: 3,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            poll_timeout_secs: parse_env("POLL_TIMEOUT_SECS", defaults.poll_timeout_secs)?,
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries)?,
        };
        if config.poll_interval_secs <= 0 || config.poll_timeout_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SECS".to_string(),
                message: "poll interval and timeout must be positive".to_string(),
            });
        }
        if config.max_retries < 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_RETRIES".to_string(),
                message: "must not be negative".to_string(),
            });
        }
        Ok(config)
    }
}

pub(crate) fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// What one settlement visit did to a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStep {
    /// Unknown or already terminal transfer
    Skipped,
    /// Next visit is in the future
    NotDue,
    /// Provider accepted the payout
    Submitted,
    /// Submission failed transiently; retry scheduled
    RetryScheduled,
    /// Payout still in flight; next status check scheduled
    PollScheduled,
    Finalized(TransferStatus),
}

/// Result of handling one provider webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Finalized(TransferStatus),
    /// Transfer was already terminal; redelivery or lost race
    AlreadyFinal(TransferStatus),
    /// Not ours, or not a terminal status
    Ignored,
}

impl AppService {
    /// Advance one transfer by a single step, based on its persisted state
    #[instrument(skip(self))]
    pub async fn settle_transfer(&self, transfer_id: &str) -> Result<SettlementStep, AppError> {
        let Some(transfer) = self.db_client.get_transfer(transfer_id).await? else {
            warn!(id = %transfer_id, "Settlement job for unknown transfer");
            return Ok(SettlementStep::Skipped);
        };
        let now = Utc::now();
        if transfer.next_attempt_at.is_some_and(|at| at > now) {
            return Ok(SettlementStep::NotDue);
        }
        let step = match transfer.status {
            TransferStatus::Pending => self.submit_payout(&transfer).await,
            TransferStatus::Processing => self.poll_payout(&transfer).await,
            _ => return Ok(SettlementStep::Skipped),
        };
        if let Err(e) = &step {
            self.defer_after_error(&transfer, e).await;
        }
        step
    }

    /// Push a failed step back so it cannot hold the head of the due scan.
    /// The delay grows with the transfer's age, capped at [`MAX_BACKOFF_SECS`].
    async fn defer_after_error(&self, transfer: &ExternalTransfer, error: &AppError) {
        let now = Utc::now();
        let age = (now - transfer.submitted_at.unwrap_or(transfer.created_at)).num_seconds();
        let delay = with_jitter(error_backoff(age, self.settlement.poll_interval_secs));
        let next_attempt = now + Duration::seconds(delay);
        warn!(
            id = %transfer.id,
            status = %transfer.status,
            retry_in_secs = delay,
            error = %error,
            "Settlement step failed, deferring"
        );
        if let Err(e) = self
            .db_client
            .schedule_next_attempt(&transfer.id, next_attempt)
            .await
        {
            error!(id = %transfer.id, error = %e, "Failed to defer transfer");
        }
    }

    /// Create the payout at the provider. Never called inside a database transaction.
    async fn submit_payout(&self, transfer: &ExternalTransfer) -> Result<SettlementStep, AppError> {
        let request = PayoutRequest::for_transfer(transfer);
        match self.payout_provider.create_payout(&request).await {
            Ok(external_id) => self.accept_payout(transfer, &external_id).await,
            Err(e) if e.is_retryable() => {
                let backoff = with_jitter(calculate_backoff(transfer.retry_count + 1));
                let next_attempt = Utc::now() + Duration::seconds(backoff);
                let retries = self
                    .db_client
                    .record_submission_failure(&transfer.id, &e.to_string(), next_attempt)
                    .await?;
                warn!(
                    id = %transfer.id,
                    retries = retries,
                    max_retries = transfer.max_retries,
                    error = %e,
                    "Payout submission failed"
                );
                if retries <= transfer.max_retries {
                    return Ok(SettlementStep::RetryScheduled);
                }

                // The payout may have been created before the failure was observed
                match self
                    .payout_provider
                    .find_payout_by_reference(&transfer.reference_id)
                    .await
                {
                    Ok(Some(external_id)) => {
                        info!(id = %transfer.id, external_id = %external_id, "Found payout by reference after retries");
                        self.accept_payout(transfer, &external_id).await
                    }
                    Ok(None) | Err(_) => {
                        let reason = format!(
                            "Payout submission failed after {} attempts: {}",
                            retries, e
                        );
                        self.finalize_step(&transfer.id, SettlementOutcome::Failed, Some(reason))
                            .await
                    }
                }
            }
            Err(e) => {
                warn!(id = %transfer.id, error = %e, "Payout rejected by provider");
                self.finalize_step(&transfer.id, SettlementOutcome::Failed, Some(e.to_string()))
                    .await
            }
        }
    }

    async fn accept_payout(
        &self,
        transfer: &ExternalTransfer,
        external_id: &str,
    ) -> Result<SettlementStep, AppError> {
        let next_poll = Utc::now() + Duration::seconds(self.settlement.poll_interval_secs);
        if self
            .db_client
            .mark_processing(&transfer.id, external_id, next_poll)
            .await?
        {
            info!(id = %transfer.id, external_id = %external_id, "Payout submitted");
            Ok(SettlementStep::Submitted)
        } else {
            // A webhook finalized it first
            Ok(SettlementStep::Skipped)
        }
    }

    /// Check an in-flight payout once, failing it when the window has closed
    async fn poll_payout(&self, transfer: &ExternalTransfer) -> Result<SettlementStep, AppError> {
        let now = Utc::now();
        let started = transfer.submitted_at.unwrap_or(transfer.created_at);
        let timed_out = now >= started + Duration::seconds(self.settlement.poll_timeout_secs);

        if let Some(external_id) = transfer.external_id.as_deref() {
            match self.payout_provider.get_payout_status(external_id).await {
                Ok(status) => {
                    if let Some((outcome, reason)) = status.outcome() {
                        return self.finalize_step(&transfer.id, outcome, reason).await;
                    }
                }
                Err(e) => {
                    warn!(id = %transfer.id, external_id = %external_id, error = %e, "Payout status check failed");
                }
            }
        } else {
            error!(id = %transfer.id, "Processing transfer has no provider payout id");
        }

        if timed_out {
            let reason = format!(
                "Payout not confirmed within {} seconds",
                self.settlement.poll_timeout_secs
            );
            return self
                .finalize_step(&transfer.id, SettlementOutcome::Failed, Some(reason))
                .await;
        }

        let next_poll = now + Duration::seconds(self.settlement.poll_interval_secs);
        self.db_client
            .schedule_next_attempt(&transfer.id, next_poll)
            .await?;
        Ok(SettlementStep::PollScheduled)
    }

    async fn finalize_step(
        &self,
        transfer_id: &str,
        outcome: SettlementOutcome,
        reason: Option<String>,
    ) -> Result<SettlementStep, AppError> {
        let result = self.finalize(transfer_id, outcome, reason).await?;
        Ok(if result.was_applied() {
            SettlementStep::Finalized(result.transfer().status)
        } else {
            SettlementStep::Skipped
        })
    }

    /// Move a transfer to its terminal state and compensate when the payout did not settle.
    /// Safe to call any number of times, from polling and webhooks alike.
    #[instrument(skip(self, reason))]
    pub async fn finalize(
        &self,
        transfer_id: &str,
        outcome: SettlementOutcome,
        reason: Option<String>,
    ) -> Result<FinalizeResult, AppError> {
        let command = FinalizeCommand {
            transfer_id: transfer_id.to_string(),
            outcome,
            reason,
            refund_transaction_id: new_id(),
            refund_reference_id: generate_reference(ReferenceKind::Refund),
        };
        let result = self.db_client.finalize_transfer(&command).await?;

        match &result {
            FinalizeResult::Applied(transfer) => {
                if outcome.requires_refund() {
                    info!(
                        id = %transfer.id,
                        status = %transfer.status,
                        refunded = %transfer.total_amount,
                        reason = ?transfer.failure_reason,
                        "Transfer finalized with refund"
                    );
                } else {
                    info!(id = %transfer.id, status = %transfer.status, "Transfer settled");
                }
            }
            FinalizeResult::AlreadyTerminal(transfer) => {
                if outcome == SettlementOutcome::Reversed
                    && transfer.status == TransferStatus::Success
                {
                    warn!(
                        id = %transfer.id,
                        reference = %transfer.reference_id,
                        "Provider reversed a settled payout; needs manual review"
                    );
                }
            }
        }

        Ok(result)
    }

    /// Apply an authenticated provider status push
    #[instrument(skip(self, notification), fields(external_id = %notification.external_id))]
    pub async fn process_payout_notification(
        &self,
        notification: &PayoutNotification,
    ) -> Result<WebhookOutcome, AppError> {
        let Some((outcome, reason)) = notification.status.outcome() else {
            return Ok(WebhookOutcome::Ignored);
        };

        let mut transfer = self
            .db_client
            .get_transfer_by_external_id(&notification.external_id)
            .await?;
        // Webhook can arrive before the provider id was recorded
        if transfer.is_none() {
            if let Some(reference) = notification.reference_id.as_deref() {
                transfer = self.db_client.get_transfer_by_reference(reference).await?;
            }
        }
        let Some(transfer) = transfer else {
            info!("Webhook for unknown payout ignored");
            return Ok(WebhookOutcome::Ignored);
        };

        let result = self.finalize(&transfer.id, outcome, reason).await?;
        Ok(match result {
            FinalizeResult::Applied(t) => WebhookOutcome::Finalized(t.status),
            FinalizeResult::AlreadyTerminal(t) => WebhookOutcome::AlreadyFinal(t.status),
        })
    }

    /// Queue every in-flight transfer whose next visit is due. Used at startup and by the crank.
    #[instrument(skip(self))]
    pub async fn enqueue_due_transfers(&self, limit: i64) -> Result<usize, AppError> {
        let Some(queue) = &self.queue else {
            return Ok(0);
        };
        let due = self.db_client.due_transfers(Utc::now(), limit).await?;
        let enqueued = due.iter().filter(|t| queue.enqueue(&t.id)).count();
        if enqueued > 0 {
            info!(due = due.len(), enqueued = enqueued, "Queued due transfers");
        }
        Ok(enqueued)
    }
}

/// Calculate exponential backoff with maximum cap
fn calculate_backoff(retry_count: i32) -> i64 {
    let backoff = 2_i64.pow(retry_count.clamp(0, 8) as u32);
    backoff.min(MAX_BACKOFF_SECS)
}

/// Delay before revisiting a transfer whose last step errored: a quarter of its age,
/// never below the poll interval, never above [`MAX_BACKOFF_SECS`]
fn error_backoff(age_secs: i64, poll_interval_secs: i64) -> i64 {
    (age_secs / 4)
        .max(poll_interval_secs)
        .clamp(1, MAX_BACKOFF_SECS)
}

/// Spread retries of transfers that failed together (±25%, at least one second)
fn with_jitter(backoff_secs: i64) -> i64 {
    let factor = rand::thread_rng().gen_range(0.75..1.25);
    ((backoff_secs as f64 * factor).round() as i64).max(1)
}
