//! Application state management.

use secrecy::SecretString;
use std::sync::Arc;

use crate::domain::{DatabaseClient, PayoutProvider};
use crate::infra::WebhookVerifier;

use super::service::AppService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub db_client: Arc<dyn DatabaseClient>,
    pub payout_provider: Arc<dyn PayoutProvider>,
    /// Verifies signed payout webhooks; webhooks are refused without it
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
}

impl AppState {
    /// Create a new application state with a default-configured service
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        payout_provider: Arc<dyn PayoutProvider>,
    ) -> Self {
        let service = AppService::new(Arc::clone(&db_client), Arc::clone(&payout_provider));
        Self::with_service(service)
    }

    /// Wrap an already-configured service
    #[must_use]
    pub fn with_service(service: AppService) -> Self {
        let db_client = service.db_client();
        let payout_provider = service.payout_provider();
        Self {
            service: Arc::new(service),
            db_client,
            payout_provider,
            webhook_verifier: None,
        }
    }

    /// Enable the payout webhook endpoint (builder pattern)
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: SecretString) -> Self {
        self.webhook_verifier = Some(Arc::new(WebhookVerifier::new(secret)));
        self
    }
}
