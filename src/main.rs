//! Bot Orchestrator - Main entry point
//!
//! This binary loads configuration, registers any configured services and
//! runs the HTTP server with all routes and middleware.

use anyhow::{Context, Result};
use bot_orchestrator::{
    api::{build_router, AppState},
    core::{init_metrics, init_tracing, AppConfig},
    services::{HealthMonitor, InMemoryStore, NewService},
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
    {
        builder.worker_threads(threads);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::from_env()?;
    let http_client = create_http_client(&config)?;
    let addr = format!("{}:{}", config.host, config.port);

    let store = InMemoryStore::new();
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(store.clone()),
        http_client,
    ));

    for service in &config.services {
        let new_service = NewService {
            name: service.name.clone(),
            endpoint: service.endpoint.clone(),
            capabilities: service.capabilities.clone(),
            description: service.description.clone(),
            max_concurrent_requests: service.max_concurrent_requests,
            timeout_seconds: service.timeout_seconds,
        };
        state
            .register_service(new_service)
            .with_context(|| format!("Failed to register configured service {}", service.name))?;
    }
    tracing::info!(
        services = state.registry.len(),
        authorization = config.model_authorization_enabled,
        rate_limit_per_minute = config.rate_limit_per_minute,
        "Orchestrator configured"
    );

    if config.health_check_interval_secs > 0 {
        let monitor = Arc::new(HealthMonitor::new(state.registry.clone()));
        monitor.spawn(Duration::from_secs(config.health_check_interval_secs));
    }

    if config.cleanup_interval_secs > 0 {
        let interval = Duration::from_secs(config.cleanup_interval_secs);
        store.spawn_purge(interval);
        state.rate_limiter.clone().spawn_cleanup(interval);
    }

    let app = build_router(state);

    tracing::info!("Starting bot orchestrator on {}", addr);
    tracing::info!("Services API: /api/v1/services, /api/v1/services/query");
    tracing::info!("Conversations API: /api/v1/conversations");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Create HTTP client with connection pooling.
///
/// No overall request timeout is set: dispatch deadlines differ per service
/// and are enforced by the query processor.
fn create_http_client(config: &AppConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.dispatch_timeout().min(Duration::from_secs(10)))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
