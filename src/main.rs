//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use upi_wallet_ledger::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use upi_wallet_ledger::app::{
    AppService, AppState, LimitEnforcer, SettlementConfig, SettlementQueue, WorkerConfig,
    spawn_crank, spawn_worker,
};
use upi_wallet_ledger::domain::TransferPolicy;
use upi_wallet_ledger::infra::{HttpPayoutClient, PayoutClientConfig, PostgresClient, PostgresConfig};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    worker_config: WorkerConfig,
    settlement_config: SettlementConfig,
    policy: TransferPolicy,
    limits: LimitEnforcer,
    payout_config: PayoutClientConfig,
    /// Payout webhook HMAC secret (optional, webhooks are refused without it)
    webhook_secret: Option<SecretString>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let webhook_secret = env::var("PAYOUT_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config: RateLimitConfig::from_env(),
            worker_config: WorkerConfig::from_env().context("Invalid worker configuration")?,
            settlement_config: SettlementConfig::from_env()
                .context("Invalid settlement configuration")?,
            policy: TransferPolicy::from_env().context("Invalid transfer policy")?,
            limits: LimitEnforcer::from_env().context("Invalid limit window configuration")?,
            payout_config: PayoutClientConfig::from_env()
                .context("Invalid payout provider configuration")?,
            webhook_secret,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let json = env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  UPI Wallet Ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let payout_client = HttpPayoutClient::new(config.payout_config)?;
    info!("   ✓ Payout provider client initialized");

    info!(
        "   ✓ Transfer policy: ₹{} to ₹{}, fees UPI ₹{} / phone ₹{}",
        config.policy.min_amount,
        config.policy.max_amount,
        config.policy.upi_fee,
        config.policy.phone_fee
    );

    let (queue, receiver) = SettlementQueue::bounded(config.worker_config.queue_capacity);
    let service = AppService::with_config(
        Arc::new(postgres_client),
        Arc::new(payout_client),
        config.policy,
        config.limits,
        config.settlement_config,
    );
    // Without workers, transfers stay pending until a worker-enabled instance picks them up
    let service = if config.worker_config.enabled {
        service.with_queue(queue)
    } else {
        service
    };

    let mut app_state = AppState::with_service(service);
    if let Some(secret) = config.webhook_secret {
        app_state = app_state.with_webhook_secret(secret);
        info!("   ✓ Payout webhook verification enabled");
    } else {
        warn!("   ○ PAYOUT_WEBHOOK_SECRET not set, payout webhooks will be refused");
    }
    let app_state = Arc::new(app_state);

    // Start settlement workers and recovery crank if enabled
    let shutdown_txs = if config.worker_config.enabled {
        let (_worker_handle, worker_tx) = spawn_worker(
            Arc::clone(&app_state.service),
            receiver,
            config.worker_config.clone(),
        );
        let (_crank_handle, crank_tx) =
            spawn_crank(Arc::clone(&app_state.service), config.worker_config.clone());
        info!(
            "   ✓ Settlement workers started ({} workers, crank every {}s)",
            config.worker_config.workers,
            config.worker_config.crank_interval.as_secs()
        );
        vec![worker_tx, crank_tx]
    } else {
        info!("   ○ Settlement workers disabled");
        Vec::new()
    };

    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for tx in shutdown_txs {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
