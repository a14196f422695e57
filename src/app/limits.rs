//! Spending-limit enforcement over calendar windows in the wallet's local time.

use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::env;

use crate::domain::{
    AppError, ConfigError, LedgerStore, LimitExceeded, LimitGuard, LimitKind, SpendingLimits,
    TransferChannel, Wallet, WindowLimit,
};

/// Indian Standard Time, UTC+05:30
pub const DEFAULT_TZ_OFFSET_MINUTES: i32 = 330;

/// Usage picture for one prospective debit
#[derive(Debug, Clone, PartialEq)]
pub struct LimitAssessment {
    /// Windows to re-check inside the reservation transaction
    pub guard: LimitGuard,
    /// Every limit the debit would cross
    pub violations: Vec<LimitExceeded>,
    /// Daily allowance left before this debit
    pub daily_remaining: Decimal,
}

impl LimitAssessment {
    pub fn is_within_limits(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Computes limit windows and evaluates usage against them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitEnforcer {
    offset_secs: i32,
}

impl Default for LimitEnforcer {
    fn default() -> Self {
        Self {
            offset_secs: DEFAULT_TZ_OFFSET_MINUTES * 60,
        }
    }
}

impl LimitEnforcer {
    /// Windows are computed at the given UTC offset in minutes
    pub fn new(offset_minutes: i32) -> Result<Self, ConfigError> {
        let offset_secs = offset_minutes * 60;
        FixedOffset::east_opt(offset_secs).ok_or_else(|| ConfigError::InvalidValue {
            key: "LIMIT_TZ_OFFSET_MINUTES".to_string(),
            message: format!("{} is out of range", offset_minutes),
        })?;
        Ok(Self { offset_secs })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("LIMIT_TZ_OFFSET_MINUTES") {
            Ok(raw) if !raw.trim().is_empty() => {
                let minutes = raw
                    .trim()
                    .parse::<i32>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "LIMIT_TZ_OFFSET_MINUTES".to_string(),
                        message: e.to_string(),
                    })?;
                Self::new(minutes)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Start of the local calendar day containing `now`
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.naive_utc() + Duration::seconds(i64::from(self.offset_secs));
        let midnight = local.date().and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&(midnight - Duration::seconds(i64::from(self.offset_secs))))
    }

    /// Start of the local calendar month containing `now`
    pub fn month_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.naive_utc() + Duration::seconds(i64::from(self.offset_secs));
        let date = local.date();
        let first = date - Days::new(u64::from(date.day0()));
        let midnight = first.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&(midnight - Duration::seconds(i64::from(self.offset_secs))))
    }

    /// Windowed limits that apply to a debit on this channel
    pub fn guard(
        &self,
        limits: &SpendingLimits,
        channel: TransferChannel,
        now: DateTime<Utc>,
    ) -> LimitGuard {
        let day = self.day_start(now);
        let mut windows = vec![
            WindowLimit {
                kind: LimitKind::Daily,
                limit: limits.daily_limit,
                since: day,
                assistant_only: false,
            },
            WindowLimit {
                kind: LimitKind::Monthly,
                limit: limits.monthly_limit,
                since: self.month_start(now),
                assistant_only: false,
            },
        ];
        if channel == TransferChannel::Assistant {
            windows.push(WindowLimit {
                kind: LimitKind::AssistantDaily,
                limit: limits.ai_daily_limit,
                since: day,
                assistant_only: true,
            });
        }
        LimitGuard { windows }
    }

    /// Static per-transaction caps, applied to the amount excluding fee
    pub fn check_per_transaction(
        limits: &SpendingLimits,
        amount: Decimal,
        channel: TransferChannel,
    ) -> Vec<LimitExceeded> {
        let mut caps = vec![(LimitKind::PerTransaction, limits.per_transaction_limit)];
        if channel == TransferChannel::Assistant {
            caps.push((
                LimitKind::AssistantPerTransaction,
                limits.ai_per_transaction_limit,
            ));
        }
        caps.into_iter()
            .filter(|(_, limit)| amount > *limit)
            .map(|(kind, limit)| LimitExceeded {
                kind,
                limit,
                used: Decimal::ZERO,
                requested: amount,
            })
            .collect()
    }

    /// Evaluate a prospective debit of `amount` (plus fee, `total`)
    pub async fn assess(
        &self,
        ledger: &dyn LedgerStore,
        wallet: &Wallet,
        amount: Decimal,
        total: Decimal,
        channel: TransferChannel,
        now: DateTime<Utc>,
    ) -> Result<LimitAssessment, AppError> {
        let limits = &wallet.limits;
        let guard = self.guard(limits, channel, now);
        let mut violations = Self::check_per_transaction(limits, amount, channel);
        let mut daily_remaining = limits.daily_limit;

        for window in &guard.windows {
            let used = ledger
                .outbound_usage(&wallet.id, window.since, window.assistant_only)
                .await?;
            if window.kind == LimitKind::Daily {
                daily_remaining = (window.limit - used).max(Decimal::ZERO);
            }
            if let Err(exceeded) = window.check(used, total) {
                violations.push(exceeded);
            }
        }

        Ok(LimitAssessment {
            guard,
            violations,
            daily_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_day_window_follows_ist_midnight() {
        let enforcer = LimitEnforcer::default();
        // 20:00 UTC is 01:30 IST the next day
        assert_eq!(
            enforcer.day_start(at("2026-10-19T20:00:00Z")),
            at("2026-10-19T18:30:00Z")
        );
        // 10:00 UTC is 15:30 IST the same day
        assert_eq!(
            enforcer.day_start(at("2026-10-19T10:00:00Z")),
            at("2026-10-18T18:30:00Z")
        );
    }

    #[test]
    fn test_month_window_in_local_time() {
        let enforcer = LimitEnforcer::default();
        assert_eq!(
            enforcer.month_start(at("2026-10-19T10:00:00Z")),
            at("2026-09-30T18:30:00Z")
        );
        // Already November in IST
        assert_eq!(
            enforcer.month_start(at("2026-10-31T19:00:00Z")),
            at("2026-10-31T18:30:00Z")
        );
    }

    #[test]
    fn test_utc_enforcer() {
        let enforcer = LimitEnforcer::new(0).unwrap();
        assert_eq!(
            enforcer.day_start(at("2026-10-19T23:59:59Z")),
            at("2026-10-19T00:00:00Z")
        );
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(LimitEnforcer::new(24 * 60).is_err());
    }

    #[test]
    fn test_assistant_guard_adds_sub_limit() {
        let enforcer = LimitEnforcer::default();
        let limits = SpendingLimits::default();
        let now = Utc::now();
        assert_eq!(
            enforcer
                .guard(&limits, TransferChannel::Direct, now)
                .windows
                .len(),
            2
        );
        let guard = enforcer.guard(&limits, TransferChannel::Assistant, now);
        assert_eq!(guard.windows.len(), 3);
        assert!(guard.windows[2].assistant_only);
        assert_eq!(guard.windows[2].limit, limits.ai_daily_limit);
    }

    #[test]
    fn test_per_transaction_caps() {
        let limits = SpendingLimits::default();
        assert!(
            LimitEnforcer::check_per_transaction(
                &limits,
                Decimal::from(10_000),
                TransferChannel::Direct
            )
            .is_empty()
        );
        let over = LimitEnforcer::check_per_transaction(
            &limits,
            Decimal::from(10_001),
            TransferChannel::Direct,
        );
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].kind, LimitKind::PerTransaction);

        let assistant = LimitEnforcer::check_per_transaction(
            &limits,
            Decimal::from(2_500),
            TransferChannel::Assistant,
        );
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].kind, LimitKind::AssistantPerTransaction);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let window = WindowLimit {
            kind: LimitKind::Daily,
            limit: Decimal::from(1000),
            since: Utc::now(),
            assistant_only: false,
        };
        assert!(window.check(Decimal::from(898), Decimal::from(102)).is_ok());
        let err = window
            .check(Decimal::from(899), Decimal::from(102))
            .unwrap_err();
        assert_eq!(err.used, Decimal::from(899));
        assert_eq!(err.requested, Decimal::from(102));
    }
}
