//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::IntoResponse,
};
use tracing::{error, info, warn};
use utoipa::OpenApi;

use crate::app::{AppState, LedgerReplay, WebhookOutcome};
use crate::domain::{
    AppError, CreateTransferRequest, CreateTransferResponse, DatabaseError, ErrorDetail,
    ErrorResponse, HealthResponse, HealthStatus, LoadWalletRequest, Page, PageParams,
    SettlementError, SpendRequest, Transaction, TransferFilters, TransferList, TransferValidation,
    TransferView, ValidateTransferRequest, Wallet, WalletError,
};
use crate::infra::payout::{SIGNATURE_HEADER, parse_notification};

/// Header carrying the authenticated caller, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "UPI Wallet Ledger API",
        version = "0.1.0",
        description = "Custodial INR wallet with UPI and phone payouts",
        license(
            name = "MIT"
        )
    ),
    paths(
        create_wallet_handler,
        get_wallet_handler,
        load_wallet_handler,
        spend_handler,
        list_transactions_handler,
        ledger_replay_handler,
        validate_transfer_handler,
        create_transfer_handler,
        list_transfers_handler,
        get_transfer_handler,
        payout_webhook_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Wallet,
            crate::domain::WalletStatus,
            crate::domain::SpendingLimits,
            Transaction,
            crate::domain::TransactionType,
            crate::domain::TransactionStatus,
            Page<Transaction>,
            LoadWalletRequest,
            SpendRequest,
            ValidateTransferRequest,
            TransferValidation,
            CreateTransferRequest,
            CreateTransferResponse,
            crate::domain::RecipientType,
            crate::domain::TransferChannel,
            crate::domain::TransferStatus,
            TransferView,
            Page<TransferView>,
            crate::domain::TransferSummary,
            TransferList,
            LedgerReplay,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "wallets", description = "Wallet and ledger endpoints"),
        (name = "transfers", description = "External UPI and phone transfers"),
        (name = "webhooks", description = "Payout provider callbacks"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Authenticated caller taken from the `x-user-id` header
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or_else(|| AppError::Authentication("Missing x-user-id header".to_string()))
    }
}

/// The caller's wallet id
async fn caller_wallet(state: &AppState, caller: &CallerId) -> Result<String, AppError> {
    Ok(state.service.get_wallet_for_user(&caller.0).await?.id)
}

/// Open a wallet for the caller
#[utoipa::path(
    post,
    path = "/wallets",
    tag = "wallets",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses(
        (status = 201, description = "Wallet created", body = Wallet),
        (status = 401, description = "Missing caller identity", body = ErrorResponse),
        (status = 409, description = "Caller already has a wallet", body = ErrorResponse)
    )
)]
pub async fn create_wallet_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
) -> Result<(StatusCode, Json<Wallet>), AppError> {
    let wallet = state.service.create_wallet(&caller.0).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// The caller's wallet
#[utoipa::path(
    get,
    path = "/wallets/me",
    tag = "wallets",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses(
        (status = 200, description = "Wallet found", body = Wallet),
        (status = 404, description = "Caller has no wallet", body = ErrorResponse)
    )
)]
pub async fn get_wallet_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
) -> Result<Json<Wallet>, AppError> {
    let wallet = state.service.get_wallet_for_user(&caller.0).await?;
    Ok(Json(wallet))
}

/// Credit the wallet with a gateway-confirmed payment
///
/// A gateway payment id is credited at most once; a replay returns 409.
#[utoipa::path(
    post,
    path = "/wallets/me/load",
    tag = "wallets",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = LoadWalletRequest,
    responses(
        (status = 201, description = "Wallet credited", body = Transaction),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Payment already credited", body = ErrorResponse)
    )
)]
pub async fn load_wallet_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Json(payload): Json<LoadWalletRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let txn = state.service.load_wallet(&wallet_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(txn)))
}

/// Internal spend from the wallet
#[utoipa::path(
    post,
    path = "/wallets/me/spend",
    tag = "wallets",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = SpendRequest,
    responses(
        (status = 201, description = "Wallet debited", body = Transaction),
        (status = 402, description = "Insufficient funds", body = ErrorResponse),
        (status = 422, description = "Spending limit exceeded", body = ErrorResponse)
    )
)]
pub async fn spend_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Json(payload): Json<SpendRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let txn = state.service.spend(&wallet_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(txn)))
}

/// Ledger entries, newest first
#[utoipa::path(
    get,
    path = "/wallets/me/transactions",
    tag = "wallets",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        PageParams
    ),
    responses(
        (status = 200, description = "Ledger page", body = Page<Transaction>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse)
    )
)]
pub async fn list_transactions_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Transaction>>, AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let page = state.service.list_transactions(&wallet_id, &params).await?;
    Ok(Json(page))
}

/// Rebuild the balance from the ledger and compare it with the stored balance
#[utoipa::path(
    get,
    path = "/wallets/me/ledger-replay",
    tag = "wallets",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses(
        (status = 200, description = "Ledger replay", body = LedgerReplay)
    )
)]
pub async fn ledger_replay_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
) -> Result<Json<LedgerReplay>, AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let replay = state.service.ledger_replay(&wallet_id).await?;
    Ok(Json(replay))
}

/// Dry-run a transfer: errors, warnings, fee and total
#[utoipa::path(
    post,
    path = "/transfers/validate",
    tag = "transfers",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = ValidateTransferRequest,
    responses(
        (status = 200, description = "Validation result", body = TransferValidation),
        (status = 400, description = "Malformed request", body = ErrorResponse)
    )
)]
pub async fn validate_transfer_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Json(payload): Json<ValidateTransferRequest>,
) -> Result<Json<TransferValidation>, AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let validation = state.service.validate_transfer(&wallet_id, &payload).await?;
    Ok(Json(validation))
}

/// Reserve funds and queue a payout
///
/// **Response indicates acceptance, not settlement.**
/// Poll `GET /transfers/{id}` to follow `pending` → `processing` → terminal.
#[utoipa::path(
    post,
    path = "/transfers",
    tag = "transfers",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = CreateTransferRequest,
    responses(
        (status = 201, description = "Transfer accepted (status 'pending')", body = CreateTransferResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 402, description = "Insufficient funds", body = ErrorResponse),
        (status = 403, description = "Wallet not active", body = ErrorResponse),
        (status = 422, description = "Spending limit exceeded", body = ErrorResponse)
    )
)]
pub async fn create_transfer_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<CreateTransferResponse>), AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let response = state.service.create_transfer(&wallet_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// List the caller's transfers with summary stats
#[utoipa::path(
    get,
    path = "/transfers",
    tag = "transfers",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        TransferFilters
    ),
    responses(
        (status = 200, description = "Transfers and summary", body = TransferList),
        (status = 400, description = "Invalid filters", body = ErrorResponse)
    )
)]
pub async fn list_transfers_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Query(filters): Query<TransferFilters>,
) -> Result<Json<TransferList>, AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let list = state.service.list_transfers(&wallet_id, &filters).await?;
    Ok(Json(list))
}

/// Get one of the caller's transfers
#[utoipa::path(
    get,
    path = "/transfers/{id}",
    tag = "transfers",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = String, Path, description = "Transfer ID")
    ),
    responses(
        (status = 200, description = "Transfer found", body = TransferView),
        (status = 404, description = "Transfer not found", body = ErrorResponse)
    )
)]
pub async fn get_transfer_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Path(id): Path<String>,
) -> Result<Json<TransferView>, AppError> {
    let wallet_id = caller_wallet(&state, &caller).await?;
    let view = state.service.get_transfer(&wallet_id, &id).await?;
    Ok(Json(view))
}

/// Receive a signed payout status push
///
/// The `X-Payout-Signature` header must carry hex(HMAC-SHA256(secret, raw body)).
/// Redeliveries are acknowledged without side effects.
#[utoipa::path(
    post,
    path = "/webhooks/payouts",
    tag = "webhooks",
    request_body(content = String, content_type = "application/json", description = "Raw provider event"),
    params(("X-Payout-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Malformed event", body = ErrorResponse),
        (status = 401, description = "Invalid signature", body = ErrorResponse),
        (status = 501, description = "Webhook secret not configured", body = ErrorResponse)
    )
)]
pub async fn payout_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let verifier = state
        .webhook_verifier
        .as_ref()
        .ok_or_else(|| AppError::NotSupported("Payout webhook secret not configured".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::SignatureInvalid)?;
    if !verifier.verify(&body, signature) {
        warn!("Payout webhook signature mismatch");
        return Err(AppError::SignatureInvalid);
    }

    let Some(notification) = parse_notification(&body)? else {
        return Ok(StatusCode::OK);
    };
    let outcome = state
        .service
        .process_payout_notification(&notification)
        .await?;
    match outcome {
        WebhookOutcome::Finalized(status) => {
            info!(external_id = %notification.external_id, status = %status, "Payout webhook applied");
        }
        WebhookOutcome::AlreadyFinal(status) => {
            info!(external_id = %notification.external_id, status = %status, "Payout webhook redelivered");
        }
        WebhookOutcome::Ignored => {}
    }
    Ok(StatusCode::OK)
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Wallet(wallet_err) => match wallet_err {
                WalletError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "wallet_not_found", self.to_string())
                }
                WalletError::NotActive { .. } => {
                    (StatusCode::FORBIDDEN, "wallet_not_active", self.to_string())
                }
                WalletError::InsufficientFunds { .. } => (
                    StatusCode::PAYMENT_REQUIRED,
                    "insufficient_funds",
                    self.to_string(),
                ),
            },
            AppError::LimitExceeded(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "limit_exceeded",
                self.to_string(),
            ),
            AppError::Settlement(settlement_err) => match settlement_err {
                SettlementError::Transient(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "payout_provider_unavailable",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "payout_provider_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::SignatureInvalid => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
