use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use airflow_lite_api::{create_app, AppState};
use airflow_lite_data::storage;
use airflow_lite_domain::config::AppConfig;
use airflow_lite_domain::registry::DagRegistry;
use airflow_lite_domain::services::BigQueryRunner;

/// The main entry point for the Airflow Lite server
///
/// 1. Sets up tracing for logging
/// 2. Loads configuration from `.env` and the environment
/// 3. Connects the object store and loads DAG definitions
/// 4. Serves the router until Ctrl-C or SIGTERM
#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stdout),
        )
        .with(env_filter)
        .init();

    if let Err(e) = run().await {
        error!("Airflow Lite failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting Airflow Lite server");

    let config = AppConfig::load().context("invalid configuration")?;
    info!("Environment: {}", config.environment);

    let store = storage::connect(&config.storage).context("failed to initialize storage")?;

    let mut registry = DagRegistry::builtin();
    if let Some(path) = &config.dags_file {
        registry
            .load_file(path)
            .with_context(|| format!("failed to load DAG definitions from {}", path.display()))?;
    }
    info!("Registered DAGs: {}", registry.dag_ids().join(", "));

    let runner = BigQueryRunner::from_config(&config.bigquery)
        .context("failed to initialize BigQuery client")?;

    let state = AppState::build(&config, store, Arc::new(runner), registry);
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Completes on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down server...");
}
