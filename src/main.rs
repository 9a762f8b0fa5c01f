use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use paylink_gateway::api::{self, AppState};
use paylink_gateway::config::AppConfig;
use paylink_gateway::database::memory::InMemoryLedger;
use paylink_gateway::database::payment_repository::PaymentRepository;
use paylink_gateway::database::repository::{PaymentStore, WebhookStore};
use paylink_gateway::database::webhook_repository::WebhookRepository;
use paylink_gateway::database::{init_pool_from_config, run_migrations};
use paylink_gateway::logging::init_tracing;
use paylink_gateway::middleware::logging::{request_logging_middleware, UuidRequestId};
use paylink_gateway::payments::registry::ProviderRegistry;
use paylink_gateway::services::notification::NotificationDispatcher;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "Starting payment gateway"
    );

    let registry = Arc::new(
        ProviderRegistry::from_config(&config.providers)
            .context("failed to build payment providers")?,
    );
    if registry.is_empty() {
        warn!("No payment provider has credentials; payment creation will be rejected");
    }

    let (payments, webhooks, db_pool) = match &config.database {
        Some(database) if !config.skip_externals => {
            let pool = init_pool_from_config(database)
                .await
                .context("failed to initialize database pool")?;
            run_migrations(&pool)
                .await
                .context("failed to apply migrations")?;
            (
                Arc::new(PaymentRepository::new(pool.clone())) as Arc<dyn PaymentStore>,
                Arc::new(WebhookRepository::new(pool.clone())) as Arc<dyn WebhookStore>,
                Some(pool),
            )
        }
        _ => {
            info!("Using in-memory ledger (SKIP_EXTERNALS=true)");
            let ledger = InMemoryLedger::new();
            (
                Arc::new(ledger.clone()) as Arc<dyn PaymentStore>,
                Arc::new(ledger) as Arc<dyn WebhookStore>,
                None,
            )
        }
    };

    let notifier = Arc::new(NotificationDispatcher::new(
        config.notification.webhook_url.clone(),
        Duration::from_secs(config.notification.timeout_secs),
    ));
    if !notifier.is_enabled() {
        info!("NOTIFICATION_WEBHOOK_URL not set; paid notifications disabled");
    }

    let state = AppState::new(
        registry,
        payments,
        webhooks,
        notifier,
        config.ledger.default_due_days,
        db_pool,
    );

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}
