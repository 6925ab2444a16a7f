//! aggsched-gateway: HTTP API for managing aggregation jobs.
//!
//! Provides:
//! - Job creation, listing and removal under `/api/v1/cron`
//! - The metric catalog under `/api/v1/metadata`
//! - HTTP health check endpoint
//! - Service bootstrap: store, event dispatcher, scheduler and graceful shutdown

pub mod handlers;
pub mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tracing::{info, warn};

use aggsched_config::AggSchedConfig;
use aggsched_cron::{
    CronRegistry, HttpResultSink, JobScheduler, SchedulerOptions, StrategyResolver,
};
use aggsched_hooks::JobEventDispatcher;
use aggsched_storage::SqliteJobStore;
use aggsched_types::MetricCatalog;

/// Shared gateway state.
pub struct GatewayState {
    pub scheduler: Arc<JobScheduler>,
    /// Allow-list creation requests are validated against.
    pub catalog: MetricCatalog,
}

/// Build the API router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/cron/add", post(handlers::add_job))
        .route("/api/v1/cron/jobs", get(handlers::list_jobs))
        .route("/api/v1/cron/job/{id}", delete(handlers::delete_job))
        .route("/api/v1/metadata", get(handlers::metadata))
        .with_state(state)
}

/// Start the scheduler service.
///
/// Opens the job store, schedules every enabled job, then serves the API
/// until Ctrl-C. Triggers are stopped once the server has drained.
pub async fn start_gateway(config: AggSchedConfig, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(config.server.port);
    let host = config.server.host.clone();

    let db_path = config.sqlite.db_path()?;
    let store = Arc::new(SqliteJobStore::open(&db_path)?);

    let dispatcher = Arc::new(JobEventDispatcher::with_logging());
    let sink = Arc::new(HttpResultSink::from_config(&config.post_result)?);
    let resolver = StrategyResolver::from_config(&config.strategy)?;
    let scheduler = Arc::new(
        JobScheduler::new(store, Arc::new(CronRegistry::new()), dispatcher, resolver, sink)
            .with_options(SchedulerOptions::from(&config.scheduler)),
    );

    let scheduled = scheduler.load_and_schedule_jobs().await?;

    let state = Arc::new(GatewayState {
        scheduler: scheduler.clone(),
        catalog: config.metrics.clone(),
    });
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Gateway listening on {addr}");
    info!("  API:       http://{addr}/api/v1");
    info!("  Health:    http://{addr}/health");
    info!("  Database:  {}", db_path.display());
    info!("  Collector: {}", config.post_result.endpoint());
    info!("  Scheduled jobs: {scheduled}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
