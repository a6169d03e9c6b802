//! Studio booking HTTP server.

use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;
use std::time::Duration;
use studio_booking::metrics::register_business_metrics;
use studio_booking::repository::BOOKINGS;
use studio_booking::types::fields;
use studio_booking::{
    AppState, BookingEngine, Config, ConsoleNotifier, RemoteSessionVerifier, build_router,
};
use studio_core::document_store::DocumentStore;
use studio_core::environment::SystemClock;
use studio_postgres::PostgresDocumentStore;
use studio_runtime::{MetricsServer, ResilientStore};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,studio_booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting studio booking server");

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        capacity = config.booking.capacity,
        cancellation_window_hours = config.booking.cancellation_window_hours,
        auth_service = %config.auth.service_url,
        "Configuration loaded"
    );

    // Metrics
    let mut metrics = MetricsServer::new();
    metrics
        .start_with(register_business_metrics)
        .context("Failed to install metrics recorder")?;
    let metrics = Arc::new(metrics);

    // Document store
    info!("Connecting to document store...");
    let postgres = PostgresDocumentStore::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    postgres.migrate().await.context("Failed to run migrations")?;
    postgres
        .ensure_unique_index(BOOKINGS, &[fields::LESSON_ID, fields::STUDENT_ID])
        .await
        .context("Failed to ensure booking uniqueness index")?;
    let store: Arc<dyn DocumentStore> = Arc::new(ResilientStore::new(
        Arc::new(postgres),
        config.store_policy(),
    ));
    info!("Document store ready");

    // Engine and auth
    let engine = Arc::new(BookingEngine::new(
        Arc::clone(&store),
        Arc::new(SystemClock),
        Arc::new(ConsoleNotifier::new()),
        config.booking,
    ));
    let verifier = RemoteSessionVerifier::new(
        &config.auth.service_url,
        Duration::from_millis(config.auth.verify_timeout_ms),
    )
    .context("Failed to build session verifier")?;

    let state = AppState::new(engine, store, Arc::new(verifier), config.auth.cron_secret.clone());
    let app = build_router(state, Duration::from_secs(config.server.request_timeout));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Prometheus exposition on its own port
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_address())
        .await
        .with_context(|| format!("Failed to bind metrics address {}", config.metrics_address()))?;
    info!(address = %config.metrics_address(), "Metrics endpoint listening");
    let metrics_app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move {
                metrics
                    .render()
                    .map_or((StatusCode::SERVICE_UNAVAILABLE, String::new()), |body| {
                        (StatusCode::OK, body)
                    })
            }
        }),
    );
    let metrics_task = tokio::spawn(
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
            .into_future(),
    );

    // API
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "HTTP server listening");

    let drain_limit = Duration::from_secs(config.server.shutdown_timeout);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();
    tokio::select! {
        result = server => result.context("HTTP server failed")?,
        () = async {
            wait_for(shutdown_rx).await;
            tokio::time::sleep(drain_limit).await;
        } => warn!(seconds = drain_limit.as_secs(), "Shutdown timeout elapsed, dropping open connections"),
    }

    match tokio::time::timeout(drain_limit, metrics_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "Metrics server failed"),
        Ok(Err(e)) => warn!(error = %e, "Metrics server task panicked"),
        Err(_) => warn!("Metrics server shutdown timed out"),
    }

    info!("Server stopped");
    Ok(())
}

/// Resolve once the shutdown flag is raised.
async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        warn!("Shutdown channel closed");
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
