use anyhow::{Context, Result};
use axum::serve;
use peershare::console;
use peershare::core::config::{AdminConfig, Config};
use peershare::core::routes::build_router;
use peershare::core::startup::forward_shutdown_signal;
use peershare::core::state::TrackerState;
use peershare::core::tracing_init::init_tracing;
use peershare::tracker::server::TrackerServer;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("config.toml")
    };

    // Load and validate configuration
    let config = Config::from_file(&config_path).context(format!(
        "Failed to load configuration from '{}'",
        config_path.display()
    ))?;
    config.tracker()?;

    // Initialize tracing/logging
    init_tracing(&config.logging);

    // Build Tokio runtime with configured number of threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let result = runtime.block_on(async_main(config, config_path));

    // The console's stdin reader may still be parked on a blocking read
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    let tracker = config.tracker()?;

    info!(
        config_path = %config_path.display(),
        bind_address = %tracker.bind_address,
        port = tracker.port,
        num_threads = config.runtime.num_threads,
        log_level = %config.logging.level,
        log_format = %config.logging.format,
        "Tracker starting"
    );

    let state = TrackerState::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = format!("{}:{}", tracker.bind_address, tracker.port);
    let server = TrackerServer::bind(&addr, state.clone(), tracker.shutdown_grace()).await?;
    info!(address = %addr, "Control listener bound successfully");

    tokio::spawn(forward_shutdown_signal(shutdown_tx.clone()));

    if tracker.console {
        tokio::spawn(console::run(state.clone(), shutdown_tx.clone()));
    }

    let admin_handle = match &config.admin {
        Some(admin) => Some(start_admin(admin, state.clone(), shutdown_rx.clone()).await?),
        None => None,
    };

    server.run(shutdown_rx).await?;
    drop(shutdown_tx);

    if let Some(handle) = admin_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Admin server failed"),
            Err(e) => error!(error = %e, "Admin server task failed"),
        }
    }

    info!(
        peers = state.directory.peer_count(),
        log_entries = state.download_log.len(),
        "Tracker shut down gracefully"
    );

    Ok(())
}

async fn start_admin(
    admin: &AdminConfig,
    state: TrackerState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<()>>> {
    let addr = format!("{}:{}", admin.bind_address, admin.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind admin listener to {}", addr))?;

    info!(address = %addr, "Admin API listening");

    let app = build_router(state);
    Ok(tokio::spawn(async move {
        serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context("Admin server error")
    }))
}
