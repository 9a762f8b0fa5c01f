pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::database::repository::{PaymentStore, WebhookStore};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::payments::registry::ProviderRegistry;
use crate::services::ledger::PaymentLedgerService;
use crate::services::notification::NotificationDispatcher;
use crate::services::webhook_processor::WebhookProcessor;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub ledger: Arc<PaymentLedgerService>,
    pub processor: Arc<WebhookProcessor>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub health_checker: HealthChecker,
}

impl AppState {
    /// Wire the ledger and the webhook engine on top of one store pair.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        payments: Arc<dyn PaymentStore>,
        webhooks: Arc<dyn WebhookStore>,
        notifier: Arc<NotificationDispatcher>,
        default_due_days: u32,
        db_pool: Option<sqlx::PgPool>,
    ) -> Self {
        let ledger = Arc::new(
            PaymentLedgerService::new(registry.clone(), payments.clone(), notifier)
                .with_default_due_days(default_due_days),
        );
        let processor = Arc::new(WebhookProcessor::new(
            registry.clone(),
            ledger.clone(),
            payments,
            webhooks.clone(),
        ));
        let health_checker = HealthChecker::new(db_pool, registry.clone());

        Self {
            registry,
            ledger,
            processor,
            webhooks,
            health_checker,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route(
            "/api/payments",
            post(payments::create_payment).get(payments::list_payments),
        )
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/payments/{id}/cancel", post(payments::cancel_payment))
        .route("/api/payments/{id}/verify", post(payments::verify_payment))
        .route("/api/providers", get(payments::list_providers))
        .route("/api/webhooks", get(payments::list_webhooks))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let health_status = state.health_checker.check_health().await;

    // 503 only when the ledger store is unreachable
    if health_status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    } else {
        (StatusCode::OK, Json(health_status))
    }
}

/// Readiness check, same checks as /health
async fn readiness(state: State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let (status, body) = health(state).await;
    if status.is_success() {
        info!("Readiness check passed");
    }
    (status, body)
}

/// Liveness check: the process is up
async fn liveness() -> &'static str {
    "OK"
}
