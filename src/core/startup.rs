use rand::Rng;
use std::path::Path;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Range the peer picks its transfer port from when none is configured.
pub const RANDOM_PORT_RANGE: std::ops::Range<u16> = 10_000..20_000;

/// Configured transfer port, or a random one in [`RANDOM_PORT_RANGE`].
pub fn resolve_listen_port(configured: Option<u16>) -> u16 {
    configured.unwrap_or_else(|| rand::rng().random_range(RANDOM_PORT_RANGE))
}

/// Configured peer id, or `<shared dir name>_<port>`.
pub fn resolve_peer_id(configured: Option<&str>, shared_dir: &Path, port: u16) -> String {
    if let Some(id) = configured {
        return id.to_string();
    }

    let base: String = shared_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "peer".to_string())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let base = if base.is_empty() { "peer".to_string() } else { base };

    format!("{}_{}", base, port)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Flip `shutdown` once a process signal arrives.
pub async fn forward_shutdown_signal(shutdown: watch::Sender<bool>) {
    tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown.send(true);
        }
        _ = shutdown.closed() => {}
    }
}
