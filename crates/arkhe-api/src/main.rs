//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use arkhe_api::batch::{run_batch, BatchRequest};
use arkhe_api::{create_router, metrics, ApiConfig, AppState, DispatchConfig, RunnerRole};
use arkhe_worker::FileStatusRecorder;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    init_tracing();

    if let Err(e) = run().await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting arkhe-api");

    let config = ApiConfig::from_env();
    let dispatch = DispatchConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        build_number = %config.build_number,
        role = ?dispatch.role,
        cloud_run = dispatch.cloud_run.is_some(),
        "Loaded configuration"
    );

    let recorder = Arc::new(FileStatusRecorder::from_env().await?);
    info!("Recording job status in {}", recorder.dir().display());

    let batch_request = match &dispatch.role {
        RunnerRole::BatchJob { .. } => BatchRequest::from_env(),
        RunnerRole::Service => None,
    };

    let (state, worker) = AppState::new(config.clone(), dispatch, recorder).await?;

    // A batch-job execution replays one request and exits
    if let Some(request) = batch_request {
        let router = create_router(state, None);
        let outcome = run_batch(router, request).await?;
        if !outcome.is_success() {
            anyhow::bail!("batch job request returned {}", outcome.status);
        }
        return Ok(());
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        match metrics::init_metrics() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let worker_handle = Arc::clone(&worker).spawn();
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.shutdown();
    if let Err(e) = worker_handle.await {
        warn!("Queue worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
