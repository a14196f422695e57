//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod policy;
pub mod recipient;
pub mod reference;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, LimitExceeded, LimitKind, SettlementError,
    ValidationError, WalletError,
};
pub use policy::TransferPolicy;
pub use recipient::RecipientType;
pub use reference::{ReferenceKind, generate_reference, new_id};
pub use traits::{
    DatabaseClient, FinalizeCommand, FinalizeResult, LedgerStore, LimitGuard, NewDebit, NewLoad,
    NewTransfer, PayoutNotification, PayoutProvider, PayoutRequest, PayoutStatus,
    SettlementOutcome, TransferStore, WalletStore, WindowLimit,
};
pub use types::{
    CreateTransferRequest, CreateTransferResponse, ErrorDetail, ErrorResponse, ExternalTransfer,
    HealthResponse, HealthStatus, LoadWalletRequest, Page, PageParams, SpendRequest,
    SpendingLimits, Transaction, TransactionStatus, TransactionType, TransferChannel,
    TransferFilters, TransferList, TransferStatus, TransferSummary, TransferValidation,
    TransferView, ValidateTransferRequest, Wallet, WalletStatus,
};
