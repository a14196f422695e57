//! Error taxonomy for the wallet ledger and settlement engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("{0}")]
    LimitExceeded(#[from] LimitExceeded),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Deserialization(err.to_string())
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| db_err.message().to_string()),
                )
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::from(err))
    }
}

/// Request validation failures. Surfaced to the caller, never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Multiple(String),
}

/// Wallet store failures
#[derive(Debug, Error, PartialEq)]
pub enum WalletError {
    #[error("Wallet not found: {0}")]
    NotFound(String),

    #[error("Wallet {wallet_id} is not active (status: {status})")]
    NotActive { wallet_id: String, status: String },

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },
}

/// Which spending limit rejected a debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    PerTransaction,
    Daily,
    Monthly,
    AssistantPerTransaction,
    AssistantDaily,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerTransaction => "per_transaction",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::AssistantPerTransaction => "assistant_per_transaction",
            Self::AssistantDaily => "assistant_daily",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A debit would cross a configured spending limit
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} limit exceeded: limit {limit}, already used {used}, requested {requested}")]
pub struct LimitExceeded {
    pub kind: LimitKind,
    pub limit: Decimal,
    pub used: Decimal,
    pub requested: Decimal,
}

/// Payout provider failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SettlementError {
    /// Network failure, timeout, 5xx or throttling. Safe to retry.
    #[error("Transient settlement failure: {0}")]
    Transient(String),

    /// Provider rejected the request (4xx). Retrying cannot succeed.
    #[error("Permanent settlement failure: {0}")]
    Permanent(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl SettlementError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::InvalidResponse(_))
    }
}

/// Startup configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
