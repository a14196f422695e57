//! Router assembly and middleware.

use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    ApiDoc, create_transfer_handler, create_wallet_handler, get_transfer_handler,
    get_wallet_handler, health_check_handler, ledger_replay_handler, list_transactions_handler,
    list_transfers_handler, liveness_handler, load_wallet_handler, payout_webhook_handler,
    readiness_handler, spend_handler, validate_transfer_handler,
};
use crate::app::AppState;
use crate::domain::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Global token-bucket settings for the public API
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

impl RateLimitConfig {
    /// Read `RATE_LIMIT_RPS` and `RATE_LIMIT_BURST`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            requests_per_second: env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.requests_per_second),
            burst_size: env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.burst_size),
        }
    }

    fn quota(&self) -> Quota {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(rps);
        Quota::per_second(rps).allow_burst(burst)
    }
}

async fn rate_limit_middleware(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check().is_err() {
        warn!(path = %request.uri().path(), "Rate limit exceeded");
        return AppError::RateLimited.into_response();
    }
    next.run(request).await
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/wallets", post(create_wallet_handler))
        .route("/wallets/me", get(get_wallet_handler))
        .route("/wallets/me/load", post(load_wallet_handler))
        .route("/wallets/me/spend", post(spend_handler))
        .route("/wallets/me/transactions", get(list_transactions_handler))
        .route("/wallets/me/ledger-replay", get(ledger_replay_handler))
        .route("/transfers/validate", post(validate_transfer_handler))
        .route(
            "/transfers",
            post(create_transfer_handler).get(list_transfers_handler),
        )
        .route("/transfers/{id}", get(get_transfer_handler))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
}

fn assemble(api: Router<Arc<AppState>>, app_state: Arc<AppState>) -> Router {
    // Provider callbacks and probes bypass the client rate limiter
    Router::new()
        .merge(api)
        .route("/webhooks/payouts", post(payout_webhook_handler))
        .merge(health_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(app_state)
}

/// Build the application router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    assemble(api_routes(), app_state)
}

/// Build the application router with a global rate limit on the wallet and transfer routes
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let limiter = Arc::new(RateLimiter::direct(config.quota()));
    let api = api_routes().route_layer(middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ));
    assemble(api, app_state)
}
