use crate::core::state::TrackerState;
use crate::tracker::session::Session;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Accepts control connections and runs one [`Session`] task per connection.
pub struct TrackerServer {
    listener: TcpListener,
    state: TrackerState,
    shutdown_grace: Duration,
}

impl TrackerServer {
    pub async fn bind(addr: &str, state: TrackerState, shutdown_grace: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind tracker listener to {}", addr))?;

        Ok(Self {
            listener,
            state,
            shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read tracker listener address")
    }

    /// Accept until `shutdown` flips, then give open sessions the grace period
    /// to finish their current command before aborting them.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut sessions = JoinSet::new();

        info!(address = %self.local_addr()?, "Tracker accepting connections");

        while !*shutdown.borrow() {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "Failed to accept control connection");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    debug!(remote = %remote, "Control connection accepted");
                    let session = Session::new(self.state.clone(), remote.ip());
                    let session_shutdown = shutdown.clone();
                    sessions.spawn(async move {
                        if let Err(e) = session.run(stream, session_shutdown).await {
                            warn!(remote = %remote, error = %e, "Session ended with I/O error");
                        }
                    });
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Session task failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        drop(self.listener);
        info!(open_sessions = sessions.len(), "Tracker listener closed, draining sessions");

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "Grace period elapsed, aborting remaining sessions"
            );
            sessions.shutdown().await;
        }

        info!("Tracker stopped");
        Ok(())
    }
}
