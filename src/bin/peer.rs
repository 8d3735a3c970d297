use anyhow::{Context, Result};
use peershare::core::config::{Config, PeerConfig};
use peershare::core::error::{DownloadError, TrackerClientError};
use peershare::core::startup::{resolve_listen_port, resolve_peer_id, shutdown_signal};
use peershare::core::tracing_init::init_tracing;
use peershare::peer::client::TransferClient;
use peershare::peer::orchestrator::Orchestrator;
use peershare::peer::server::{TransferServer, TransferServerConfig};
use peershare::peer::storage::{FsStore, ResourceStore};
use peershare::peer::tracker_client::TrackerClient;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

const PROMPT: &str = "> resource to download (or 'exit'): ";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("config.toml")
    };

    let config = Config::from_file(&config_path).context(format!(
        "Failed to load configuration from '{}'",
        config_path.display()
    ))?;
    let peer = config.peer()?.clone();

    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let result = runtime.block_on(async_main(peer));

    // stdin may still be parked on a blocking read after Ctrl+C
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(config: PeerConfig) -> Result<()> {
    let port = resolve_listen_port(config.port);
    let peer_id = resolve_peer_id(config.id.as_deref(), &config.shared_dir, port);

    info!(
        peer_id = %peer_id,
        port,
        shared_dir = %config.shared_dir.display(),
        download_dir = %config.download_dir.display(),
        tracker = %config.tracker_address,
        "Peer starting"
    );

    let store: Arc<dyn ResourceStore> =
        Arc::new(FsStore::new(&config.shared_dir, &config.download_dir));

    let server = TransferServer::bind(
        &format!("{}:{}", config.bind_address, port),
        Arc::clone(&store),
        TransferServerConfig {
            poll_interval: config.poll_interval(),
            io_timeout: config.io_timeout(),
            shutdown_grace: config.shutdown_grace(),
        },
    )
    .await?
    .spawn()?;

    let mut tracker = TrackerClient::connect(
        &config.tracker_address,
        config.connect_timeout(),
        config.io_timeout(),
    )
    .await
    .context("Failed to reach the tracker")?;

    let catalog = {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || store.list_local_resource_names())
            .await
            .context("Failed to list local resources")?
    };
    info!(resources = ?catalog, "Local resources available");

    tracker
        .register(&peer_id, port, catalog)
        .await
        .context("Failed to register with the tracker")?;

    let orchestrator = Orchestrator::new(
        peer_id.clone(),
        port,
        TransferClient::new(config.connect_timeout(), config.io_timeout()),
        store,
    );

    let outcome = prompt_loop(&orchestrator, &mut tracker).await;

    if let Err(e) = tracker.disconnect(&peer_id).await {
        warn!(error = %e, "Failed to deregister from the tracker");
    }
    server.stop().await?;

    info!(peer_id = %peer_id, "Peer disconnected and transfer server stopped");
    outcome
}

/// Read resource names from stdin and download each one until `exit`,
/// end of input, or a shutdown signal.
async fn prompt_loop(orchestrator: &Orchestrator, tracker: &mut TrackerClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = &mut shutdown => return Ok(()),
        };

        let Some(line) = line else {
            return Ok(());
        };
        let resource = line.trim();

        if resource.is_empty() {
            continue;
        }
        if resource.eq_ignore_ascii_case("exit") {
            return Ok(());
        }
        if resource.contains(char::is_whitespace) {
            warn!(input = %resource, "Resource names cannot contain whitespace");
            continue;
        }

        match orchestrator.download(tracker, resource).await {
            Ok(report) => {
                info!(
                    resource = %report.resource,
                    source = %report.source,
                    bytes = report.bytes,
                    "Resource saved to the download directory"
                );
            }
            Err(DownloadError::ResourceNotFound(resource)) => {
                warn!(resource = %resource, "No peer holds this resource");
            }
            Err(DownloadError::Tracker(e)) if !matches!(e, TrackerClientError::Rejected(_)) => {
                // The control connection is unusable after a transport failure
                error!(error = %e, "Lost contact with the tracker");
                return Err(e.into());
            }
            Err(e) => {
                error!(resource = %resource, error = %e, "Download failed");
            }
        }
    }
}
