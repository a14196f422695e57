//! Integration tests for the API.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use upi_wallet_ledger::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use upi_wallet_ledger::app::AppState;
use upi_wallet_ledger::domain::{
    CreateTransferResponse, ErrorResponse, HealthResponse, HealthStatus, Page, Transaction,
    TransferList, TransferStatus, TransferValidation, TransferView, Wallet,
};
use upi_wallet_ledger::infra::WebhookVerifier;
use upi_wallet_ledger::test_utils::{MockDatabaseClient, MockPayoutProvider};

const WEBHOOK_SECRET: &str = "whsec_test";

struct TestApp {
    db: Arc<MockDatabaseClient>,
    payout: Arc<MockPayoutProvider>,
    state: Arc<AppState>,
}

fn create_test_app() -> TestApp {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());
    let state = AppState::new(Arc::clone(&db) as _, Arc::clone(&payout) as _)
        .with_webhook_secret(SecretString::from(WEBHOOK_SECRET));
    TestApp {
        db,
        payout,
        state: Arc::new(state),
    }
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    async fn funded_wallet(&self, user: &str, amount: i64) -> Wallet {
        let wallet = self.state.service.create_wallet(user).await.unwrap();
        self.state
            .service
            .load_wallet(
                &wallet.id,
                &upi_wallet_ledger::domain::LoadWalletRequest {
                    amount: Decimal::from(amount),
                    gateway_order_id: format!("order_{}", user),
                    gateway_payment_id: format!("pay_{}", user),
                },
            )
            .await
            .unwrap();
        self.state.service.get_wallet(&wallet.id).await.unwrap()
    }
}

fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body_bytes).unwrap()
}

#[tokio::test]
async fn test_create_wallet_and_fetch() {
    let app = create_test_app();

    let response = app
        .router()
        .oneshot(json_request("POST", "/wallets", Some("user_1"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Wallet = read_json(response).await;
    assert_eq!(created.user_id, "user_1");
    assert_eq!(created.balance, Decimal::ZERO);
    assert_eq!(created.currency, "INR");

    let response = app
        .router()
        .oneshot(get_request("/wallets/me", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Wallet = read_json(response).await;
    assert_eq!(fetched.id, created.id);

    // One wallet per user
    let response = app
        .router()
        .oneshot(json_request("POST", "/wallets", Some("user_1"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let app = create_test_app();

    let response = app
        .router()
        .oneshot(get_request("/wallets/me", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.error.r#type, "authentication_error");
}

#[tokio::test]
async fn test_store_failure_is_internal_error() {
    let db = Arc::new(MockDatabaseClient::failing("connection reset by peer"));
    let payout = Arc::new(MockPayoutProvider::new());
    let state = Arc::new(AppState::new(db as _, payout as _));

    let response = create_router(state)
        .oneshot(get_request("/wallets/me", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.error.r#type, "database_error");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = create_test_app();
    app.funded_wallet("user_1", 1000).await;

    let description = "x".repeat(128 * 1024);
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers",
            Some("user_1"),
            json!({
                "amount": "10",
                "recipient_type": "upi",
                "recipient_value": "friend@okbank",
                "description": description
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.db.get_all_transfers().is_empty());
}

#[tokio::test]
async fn test_openapi_documents_raw_webhook_body() {
    let app = create_test_app();

    let response = app
        .router()
        .oneshot(get_request("/api-docs/openapi.json", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = read_json(response).await;
    let webhook = &doc["paths"]["/webhooks/payouts"]["post"];
    assert!(webhook["requestBody"]["content"]["application/json"].is_object());
    assert!(doc["paths"]["/transfers/validate"]["post"].is_object());
}

#[tokio::test]
async fn test_wallet_not_found() {
    let app = create_test_app();

    let response = app
        .router()
        .oneshot(get_request("/wallets/me", Some("nobody")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_load_spend_and_list_transactions() {
    let app = create_test_app();
    app.state.service.create_wallet("user_1").await.unwrap();

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/wallets/me/load",
            Some("user_1"),
            json!({"amount": "500.00", "gateway_order_id": "order_9", "gateway_payment_id": "pay_9"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let load: Transaction = read_json(response).await;
    assert_eq!(load.balance_after, Decimal::from(500));

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/wallets/me/spend",
            Some("user_1"),
            json!({"amount": "120.25", "description": "groceries"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .router()
        .oneshot(get_request(
            "/wallets/me/transactions?page=1&per_page=10",
            Some("user_1"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: Page<Transaction> = read_json(response).await;
    assert_eq!(page.total_items, 2);
    // Newest first
    assert_eq!(page.items[0].amount, "120.25".parse::<Decimal>().unwrap());
    assert_eq!(page.items[0].balance_after, "379.75".parse::<Decimal>().unwrap());
}

#[tokio::test]
async fn test_overspend_returns_payment_required() {
    let app = create_test_app();
    app.funded_wallet("user_1", 100).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/wallets/me/spend",
            Some("user_1"),
            json!({"amount": "100.01"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.error.r#type, "insufficient_funds");
}

#[tokio::test]
async fn test_validate_transfer_dry_run() {
    let app = create_test_app();
    let wallet = app.funded_wallet("user_1", 1000).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers/validate",
            Some("user_1"),
            json!({"amount": "950", "recipient_type": "upi", "recipient_value": "friend@okbank"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let validation: TransferValidation = read_json(response).await;
    assert!(validation.valid);
    assert_eq!(validation.fee, Decimal::from(2));
    assert_eq!(validation.total, Decimal::from(952));
    // Balance left would be 48
    assert!(validation.warnings.iter().any(|w| w.contains("balance")));

    // Nothing reserved
    assert_eq!(app.db.balance(&wallet.id), Some(Decimal::from(1000)));
}

#[tokio::test]
async fn test_validate_empty_recipient_reports_error() {
    let app = create_test_app();
    app.funded_wallet("user_1", 1000).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers/validate",
            Some("user_1"),
            json!({"amount": "100", "recipient_type": "phone", "recipient_value": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let validation: TransferValidation = read_json(response).await;
    assert!(!validation.valid);
    assert!(
        validation
            .errors
            .iter()
            .any(|e| e.contains("Phone number is required"))
    );
    assert_eq!(validation.fee, Decimal::from(5));
}

#[tokio::test]
async fn test_create_transfer_then_get_and_list() {
    let app = create_test_app();
    app.funded_wallet("user_1", 1000).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers",
            Some("user_1"),
            json!({
                "amount": "100",
                "recipient_type": "phone",
                "recipient_value": "9876543210",
                "recipient_name": "Asha",
                "description": "rent share"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: CreateTransferResponse = read_json(response).await;
    assert_eq!(created.status, TransferStatus::Pending);
    assert_eq!(created.fee, Decimal::from(5));
    assert_eq!(created.total, Decimal::from(105));

    let response = app
        .router()
        .oneshot(get_request(
            &format!("/transfers/{}", created.id),
            Some("user_1"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view: TransferView = read_json(response).await;
    assert_eq!(view.reference_id, created.reference_id);
    assert_eq!(view.recipient_display, "Asha (******3210)");

    let response = app
        .router()
        .oneshot(get_request("/transfers?status=pending", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list: TransferList = read_json(response).await;
    assert_eq!(list.transfers.items.len(), 1);
    assert_eq!(list.summary.total_count, 1);
    assert_eq!(list.summary.pending_count, 1);
}

#[tokio::test]
async fn test_other_users_transfer_is_not_found() {
    let app = create_test_app();
    let wallet = app.funded_wallet("user_1", 1000).await;
    app.state.service.create_wallet("user_2").await.unwrap();
    let created = app
        .state
        .service
        .create_transfer(
            &wallet.id,
            &upi_wallet_ledger::domain::CreateTransferRequest::new(
                Decimal::from(10),
                upi_wallet_ledger::domain::RecipientType::Upi,
                "friend@okbank",
            ),
        )
        .await
        .unwrap();

    let response = app
        .router()
        .oneshot(get_request(
            &format!("/transfers/{}", created.id),
            Some("user_2"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_transfer_invalid_recipient() {
    let app = create_test_app();
    app.funded_wallet("user_1", 1000).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers",
            Some("user_1"),
            json!({"amount": "100", "recipient_type": "upi", "recipient_value": "no-at-sign"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.error.r#type, "validation_error");
    assert!(app.db.get_all_transfers().is_empty());
}

#[tokio::test]
async fn test_create_transfer_over_limit_is_unprocessable() {
    let app = create_test_app();
    app.funded_wallet("user_1", 50_000).await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/transfers",
            Some("user_1"),
            json!({"amount": "15000", "recipient_type": "upi", "recipient_value": "friend@okbank"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.error.r#type, "limit_exceeded");
}

#[tokio::test]
async fn test_ledger_replay_endpoint() {
    let app = create_test_app();
    app.funded_wallet("user_1", 1000).await;

    let response = app
        .router()
        .oneshot(get_request("/wallets/me/ledger-replay", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let replay: Value = read_json(response).await;
    assert_eq!(replay["entries"], 1);
    assert_eq!(replay["current_balance"], "1000");
    assert_eq!(replay["replayed_balance"], "1000");
}

fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/payouts")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Payout-Signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn payout_event(event: &str, external_id: &str, reference_id: &str) -> String {
    json!({
        "event": event,
        "payload": {
            "payout": {
                "entity": {
                    "id": external_id,
                    "status": event.trim_start_matches("payout."),
                    "reference_id": reference_id,
                    "failure_reason": "beneficiary account closed"
                }
            }
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_signed_webhook_finalizes_transfer() {
    let app = create_test_app();
    let wallet = app.funded_wallet("user_1", 1000).await;
    let created = app
        .state
        .service
        .create_transfer(
            &wallet.id,
            &upi_wallet_ledger::domain::CreateTransferRequest::new(
                Decimal::from(100),
                upi_wallet_ledger::domain::RecipientType::Upi,
                "friend@okbank",
            ),
        )
        .await
        .unwrap();
    app.state.service.settle_transfer(&created.id).await.unwrap();
    assert_eq!(app.payout.create_calls(), 1);
    let external_id = format!("pout_{}", created.reference_id);

    let body = payout_event("payout.failed", &external_id, &created.reference_id);
    let signature = WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET)).sign(body.as_bytes());

    let response = app
        .router()
        .oneshot(webhook_request(&body, Some(signature.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.db.balance(&wallet.id), Some(Decimal::from(1000)));

    // Redelivery is acknowledged without a second refund
    let response = app
        .router()
        .oneshot(webhook_request(&body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.db.balance(&wallet.id), Some(Decimal::from(1000)));

    let transfer = app.db.get_all_transfers().pop().unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    assert_eq!(
        transfer.failure_reason.as_deref(),
        Some("beneficiary account closed")
    );
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let app = create_test_app();
    let body = payout_event("payout.processed", "pout_1", "EXT1");

    let response = app
        .router()
        .oneshot(webhook_request(&body, Some("deadbeef".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(webhook_request(&body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_for_unrelated_event_is_acknowledged() {
    let app = create_test_app();
    let body = json!({"event": "payout.queued", "payload": {}}).to_string();
    let signature = WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET)).sign(body.as_bytes());

    let response = app
        .router()
        .oneshot(webhook_request(&body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_without_secret_is_not_supported() {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());
    let router = create_router(Arc::new(AppState::new(db as _, payout as _)));

    let response = router
        .oneshot(webhook_request("{}", Some("00".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_health_check_healthy() {
    let app = create_test_app();

    let response = app
        .router()
        .oneshot(get_request("/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = read_json(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.database, HealthStatus::Healthy);
    assert_eq!(health.payout_provider, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_readiness_follows_database() {
    let app = create_test_app();
    app.db.set_healthy(false);

    let response = app
        .router()
        .oneshot(get_request("/health/ready", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .router()
        .oneshot(get_request("/health/live", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_rejects_burst_but_spares_health() {
    let app = create_test_app();
    app.state.service.create_wallet("user_1").await.unwrap();
    let router = create_router_with_rate_limit(
        Arc::clone(&app.state),
        RateLimitConfig {
            requests_per_second: 1,
            burst_size: 1,
        },
    );

    let first = router
        .clone()
        .oneshot(get_request("/wallets/me", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(get_request("/wallets/me", Some("user_1")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let health = router
        .oneshot(get_request("/health/live", None))
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}
