//! forge-server — entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Start the model-runner scheduler.
//! 5. Build the registry (blob store + transport).
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod db;
mod error;
mod middleware;
mod model_resolve;
mod routes;
mod runner_factory;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use forge_registry::{Credentials, Registry};
use forge_runtime_core::{Scheduler, SchedulerConfig, StaticDeviceInventory};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::sqlite::SqliteStore;
use crate::runner_factory::MockRunnerFactory;
use crate::state::{AppState, TaskManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ──────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: FORGE_LOG='{}' is not a valid tracing filter ({}); falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "forge-server starting");

    // ── 3. Database ─────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Scheduler ────────────────────────────────────────────────────
    // No real inference worker is wired up here (spec: the worker process
    // is an opaque handle); the device inventory is left empty, which
    // forces every runner onto CPU placement.
    let devices = Arc::new(StaticDeviceInventory(Vec::new()));
    let factory = Arc::new(MockRunnerFactory::new(devices.clone()));
    let scheduler_config = SchedulerConfig {
        max_runners: cfg.max_loaded_models,
        max_queue: cfg.max_queue,
        gpu_overhead: forge_runtime_core::GpuOverhead(cfg.gpu_overhead),
        default_keep_alive: cfg.keep_alive,
        ..Default::default()
    };
    let scheduler = Scheduler::start(scheduler_config, factory, devices);
    info!("scheduler started");

    // ── 5. Registry ─────────────────────────────────────────────────────
    let registry = Arc::new(Registry::new(cfg.data_dir.clone(), Credentials::default()));
    registry.blobs().ensure_dirs().await?;
    info!(data_dir = %cfg.data_dir, "registry ready");

    // ── 6. Shared application state ─────────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store: Arc::new(store),
        scheduler,
        registry,
        task_manager: Arc::new(TaskManager::new()),
    });

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    state.scheduler.unload_all().await;
    info!("forge-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}

