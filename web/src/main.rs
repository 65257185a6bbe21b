//! Turnstile admission-control server.
//!
//! Serves the operator surface (admin, health, metrics) over the breakers,
//! rate limiters and email retry queue, configured from `TURNSTILE_*`
//! environment variables or the TOML file named by `TURNSTILE_CONFIG`.
//!
//! Run with: `cargo run --bin turnstile-server`
//! Health: `http://localhost:8080/health/ready`
//! Metrics: `http://localhost:8080/metrics`

use anyhow::Context as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::environment::{Clock, SystemClock};
use turnstile_runtime::metrics::MetricsServer;
use turnstile_runtime::registry::EMAIL;
use turnstile_runtime::{AdmissionConfig, RetryQueue};
use turnstile_web::AdmissionState;
use turnstile_web::email::{EmailMessage, LogEmailSender};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AdmissionConfig::from_env().context("Failed to load configuration")?;
    info!(bind_address = %config.server.bind_address, "Starting turnstile server");

    let metrics = if config.server.metrics_enabled {
        let mut server = MetricsServer::new();
        server.start()?;
        Some(Arc::new(server))
    } else {
        None
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(config.breakers.build_registry(Arc::clone(&clock)));
    let rate_limiters = Arc::new(config.rate_limits.build_limiters(&clock));

    let email_breaker = registry
        .get(EMAIL)
        .context("email circuit breaker is not registered")?;
    let email_queue = Arc::new(RetryQueue::<EmailMessage, _>::with_clock(
        config.retry_queue.to_config(),
        LogEmailSender::new(),
        email_breaker,
        Arc::clone(&clock),
    ));
    let worker = email_queue.spawn();

    let mut state = AdmissionState::new(registry, rate_limiters).with_retry_queue(email_queue);
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }
    let app = turnstile_web::router(state);

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("Waiting for retry queue worker to stop");
    worker.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
