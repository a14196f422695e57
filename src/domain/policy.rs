//! Transfer policy: amount bounds, flat fees and advisory thresholds.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use super::error::ConfigError;
use super::recipient::RecipientType;

/// Configuration shared by the dry-run and creation paths
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPolicy {
    /// Smallest transferable amount (excluding fee)
    pub min_amount: Decimal,
    /// Largest transferable amount (excluding fee)
    pub max_amount: Decimal,
    /// Flat fee for UPI payouts
    pub upi_fee: Decimal,
    /// Flat fee for phone-number payouts
    pub phone_fee: Decimal,
    /// Amounts at or above this get a large-transfer warning
    pub large_transfer_threshold: Decimal,
    /// Post-transfer balances below this get a low-balance warning
    pub low_balance_threshold: Decimal,
    /// Share of remaining daily allowance above which a warning is raised
    pub daily_usage_warning_ratio: Decimal,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            min_amount: Decimal::ONE,
            max_amount: Decimal::from(100_000),
            upi_fee: Decimal::from(2),
            phone_fee: Decimal::from(5),
            large_transfer_threshold: Decimal::from(10_000),
            low_balance_threshold: Decimal::from(100),
            daily_usage_warning_ratio: Decimal::new(8, 1),
        }
    }
}

impl TransferPolicy {
    /// Load overrides from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            min_amount: decimal_env("TRANSFER_MIN_AMOUNT", defaults.min_amount)?,
            max_amount: decimal_env("TRANSFER_MAX_AMOUNT", defaults.max_amount)?,
            upi_fee: decimal_env("UPI_FEE", defaults.upi_fee)?,
            phone_fee: decimal_env("PHONE_FEE", defaults.phone_fee)?,
            large_transfer_threshold: decimal_env(
                "LARGE_TRANSFER_THRESHOLD",
                defaults.large_transfer_threshold,
            )?,
            low_balance_threshold: decimal_env(
                "LOW_BALANCE_THRESHOLD",
                defaults.low_balance_threshold,
            )?,
            daily_usage_warning_ratio: defaults.daily_usage_warning_ratio,
        })
    }

    /// Flat fee by recipient type
    pub fn fee_for(&self, recipient_type: RecipientType) -> Decimal {
        match recipient_type {
            RecipientType::Upi => self.upi_fee,
            RecipientType::Phone => self.phone_fee,
        }
    }

    /// Amount plus fee: what leaves the wallet
    pub fn total_for(&self, amount: Decimal, recipient_type: RecipientType) -> Decimal {
        amount + self.fee_for(recipient_type)
    }

    pub fn estimated_time(&self, recipient_type: RecipientType) -> &'static str {
        match recipient_type {
            RecipientType::Upi => "Instant (usually within 30 seconds)",
            RecipientType::Phone => "Within 2 minutes",
        }
    }

    /// Bounds check on the transfer amount
    pub fn check_amount(&self, amount: Decimal) -> Result<(), String> {
        if amount.normalize().scale() > 2 {
            return Err("Amount cannot have more than 2 decimal places".to_string());
        }
        if amount < self.min_amount {
            return Err(format!("Minimum transfer amount is ₹{}", self.min_amount));
        }
        if amount > self.max_amount {
            return Err(format!("Maximum transfer amount is ₹{}", self.max_amount));
        }
        Ok(())
    }
}

fn decimal_env(key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = Decimal::from_str(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            if value.is_sign_negative() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must not be negative".to_string(),
                });
            }
            Ok(value)
        }
        _ => Ok(default),
    }
}
