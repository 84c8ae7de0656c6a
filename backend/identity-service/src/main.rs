/// Identity Service Main Entry Point
///
/// Starts the registration HTTP API with:
/// - PostgreSQL credential store (in-memory when `DATABASE_URL` is unset)
/// - Integration event publisher (in-memory broker when `BROKER_HOST` is unset)
/// - JWT token issuer
use anyhow::{anyhow, Context, Result};
use identity_service::{
    broker::InMemoryBroker,
    config::{DatabaseSettings, Settings},
    db::{CredentialStore, InMemoryCredentialStore, PgCredentialStore},
    http::{start_http_server, HttpServerState},
    registration::{
        RegistrationContext, RegistrationCoordinator, StoreBackedValidator, StrategySelector,
    },
    security::TokenIssuer,
    services::{EventPublisher, IntegrationEventPublisher},
};
use resilience::{presets, with_retry, with_timeout_or};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "identity_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Identity Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let tokens = TokenIssuer::from_settings(&settings.jwt)
        .context("Failed to initialize token issuer")?;
    info!(algorithm = %settings.jwt.algorithm, "Token issuer initialized");

    let store: Arc<dyn CredentialStore> = match &settings.database {
        Some(database) => {
            let pool = connect_database(database).await?;
            info!(
                "Database pool initialized with {} max connections",
                database.max_connections
            );

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations completed");

            Arc::new(PgCredentialStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; accounts are kept in memory");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &settings.broker {
        Some(broker) => {
            info!(
                address = %broker.address(),
                tls = broker.tls.is_some(),
                "Integration events go to the message broker"
            );
            Arc::new(IntegrationEventPublisher::from_settings(broker))
        }
        None => {
            warn!("BROKER_HOST not set; integration events stay in process");
            let preset = presets::broker_publish_config();
            Arc::new(IntegrationEventPublisher::new(
                InMemoryBroker::new(),
                preset.retry.unwrap_or_default(),
                preset.timeout.duration,
            ))
        }
    };

    let context = RegistrationContext {
        validator: Arc::new(StoreBackedValidator::new(Arc::clone(&store))),
        store,
        tokens: Arc::new(tokens),
        publisher: Arc::clone(&publisher),
    };
    let coordinator = RegistrationCoordinator::new(StrategySelector::new(context));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    start_http_server(
        HttpServerState {
            coordinator: Arc::new(coordinator),
            shutdown,
        },
        &settings.server.host,
        settings.server.port,
    )
    .await
    .context("HTTP server error")?;

    publisher.shutdown().await;
    info!("Identity service shutdown complete");

    Ok(())
}

/// Connect with the database bootstrap preset; connecting performs no writes
async fn connect_database(settings: &DatabaseSettings) -> Result<PgPool> {
    let preset = presets::database_connect_config();
    let attempt_timeout = preset.timeout.duration;
    let max_connections = settings.max_connections;
    let acquire_timeout = Duration::from_secs(settings.acquire_timeout);
    let url = settings.url.clone();

    with_retry(preset.retry.unwrap_or_default(), move || {
        let url = url.clone();
        async move {
            with_timeout_or(
                attempt_timeout,
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&url),
                |_| sqlx::Error::PoolTimedOut,
            )
            .await
        }
    })
    .await
    .map_err(|e| anyhow!("Failed to connect to PostgreSQL: {}", e))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
