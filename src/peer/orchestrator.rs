use crate::core::error::{DownloadError, StorageError};
use crate::models::candidate::Candidate;
use crate::peer::client::{Transfer, TransferClient};
use crate::peer::storage::ResourceStore;
use crate::peer::tracker_client::TrackerClient;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A download that produced the resource locally.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub resource: String,
    pub source: Candidate,
    pub bytes: usize,
    /// Candidates tried, including the one that succeeded
    pub attempts: usize,
    /// Whether the tracker acknowledged the refreshed catalog
    pub catalog_updated: bool,
}

/// Drives one user-requested download across the tracker's candidates.
pub struct Orchestrator {
    peer_id: String,
    listen_port: u16,
    transfers: TransferClient,
    store: Arc<dyn ResourceStore>,
}

impl Orchestrator {
    pub fn new(
        peer_id: impl Into<String>,
        listen_port: u16,
        transfers: TransferClient,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            listen_port,
            transfers,
            store,
        }
    }

    #[instrument(skip(self, tracker), fields(peer_id = %self.peer_id))]
    pub async fn download(
        &self,
        tracker: &mut TrackerClient,
        resource: &str,
    ) -> Result<DownloadReport, DownloadError> {
        let candidates = tracker.peers_for(resource).await?;
        if candidates.is_empty() {
            info!("No peer holds the resource");
            return Err(DownloadError::ResourceNotFound(resource.to_string()));
        }

        let mut attempts = 0;
        for candidate in candidates {
            attempts += 1;

            let outcome = self
                .transfers
                .fetch(candidate.socket_addr(), resource)
                .await;
            let delivered = match outcome {
                Ok(Transfer::Delivered(bytes)) => Some(bytes),
                Ok(Transfer::Denied) => {
                    warn!(candidate = %candidate, "Candidate denied the transfer");
                    None
                }
                Err(e) => {
                    warn!(candidate = %candidate, error = %e, "Transfer failed");
                    None
                }
            };

            tracker
                .log_download(resource, &candidate.peer_id, &self.peer_id, delivered.is_some())
                .await?;

            let Some(bytes) = delivered else {
                let next = tracker.report_failure(resource, &candidate.peer_id).await?;
                info!(failed = %candidate.peer_id, next = ?next, "Reported failed candidate");
                continue;
            };

            self.persist(resource, bytes.clone()).await?;
            let catalog_updated = self.refresh_catalog(tracker).await?;

            info!(
                source = %candidate,
                bytes = bytes.len(),
                attempts,
                "Download complete"
            );
            return Ok(DownloadReport {
                resource: resource.to_string(),
                source: candidate,
                bytes: bytes.len(),
                attempts,
                catalog_updated,
            });
        }

        Err(DownloadError::Exhausted {
            resource: resource.to_string(),
            attempts,
        })
    }

    async fn persist(&self, resource: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let store = Arc::clone(&self.store);
        let name = resource.to_string();
        tokio::task::spawn_blocking(move || store.write_bytes(&name, &bytes))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }

    /// Send the current local catalog to the tracker.
    pub async fn refresh_catalog(&self, tracker: &mut TrackerClient) -> Result<bool, DownloadError> {
        let store = Arc::clone(&self.store);
        let catalog = tokio::task::spawn_blocking(move || store.list_local_resource_names())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        let updated = tracker
            .update(&self.peer_id, self.listen_port, catalog)
            .await?;
        if !updated {
            warn!("Tracker no longer knows this peer; catalog not refreshed");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::TrackerState;
    use crate::peer::server::{TransferServer, TransferServerConfig, TransferServerHandle};
    use crate::peer::storage::{FsStore, InMemoryStore};
    use crate::protocol::control::{Command, Reply};
    use crate::tracker::server::TrackerServer;
    use crate::tracker::session::Session;
    use std::collections::BTreeSet;
    use std::fs;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::watch;

    async fn start_tracker() -> (String, TrackerState, watch::Sender<bool>) {
        let state = TrackerState::new();
        let server = TrackerServer::bind("127.0.0.1:0", state.clone(), Duration::from_millis(200))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(shutdown_rx));
        (addr, state, shutdown_tx)
    }

    async fn start_peer(store: Arc<dyn ResourceStore>) -> TransferServerHandle {
        let config = TransferServerConfig {
            poll_interval: Duration::from_millis(20),
            ..TransferServerConfig::default()
        };
        TransferServer::bind("127.0.0.1:0", store, config)
            .await
            .unwrap()
            .spawn()
            .unwrap()
    }

    async fn connect(addr: &str) -> TrackerClient {
        TrackerClient::connect(addr, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap()
    }

    fn transfers() -> TransferClient {
        TransferClient::new(Duration::from_secs(2), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_end_to_end_download() {
        let (tracker_addr, state, _shutdown) = start_tracker().await;

        let dir_a = TempDir::new().unwrap();
        let shared_a = dir_a.path().join("shared");
        fs::create_dir_all(&shared_a).unwrap();
        fs::write(shared_a.join("doc.txt"), b"the quick brown fox").unwrap();
        let store_a: Arc<dyn ResourceStore> =
            Arc::new(FsStore::new(&shared_a, dir_a.path().join("download")));
        let server_a = start_peer(Arc::clone(&store_a)).await;

        let mut tracker_a = connect(&tracker_addr).await;
        tracker_a
            .register("A", server_a.port(), store_a.list_local_resource_names())
            .await
            .unwrap();

        let dir_b = TempDir::new().unwrap();
        let store_b: Arc<dyn ResourceStore> = Arc::new(FsStore::new(
            dir_b.path().join("shared"),
            dir_b.path().join("download"),
        ));
        let server_b = start_peer(Arc::clone(&store_b)).await;
        let mut tracker_b = connect(&tracker_addr).await;
        tracker_b
            .register("B", server_b.port(), BTreeSet::new())
            .await
            .unwrap();

        let orchestrator = Orchestrator::new("B", server_b.port(), transfers(), Arc::clone(&store_b));
        let report = orchestrator.download(&mut tracker_b, "doc.txt").await.unwrap();

        assert_eq!(report.source.peer_id, "A");
        assert_eq!(report.attempts, 1);
        assert!(report.catalog_updated);
        assert_eq!(
            fs::read(dir_b.path().join("download").join("doc.txt")).unwrap(),
            b"the quick brown fox"
        );

        let catalog = tracker_b.list_data().await.unwrap();
        assert_eq!(
            catalog["doc.txt"],
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );

        let log = state.download_log.snapshot();
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
        assert_eq!(log[0].from_peer, "A");
        assert_eq!(log[0].to_peer, "B");

        // B now serves the downloaded copy itself
        let again = transfers().fetch(server_b.local_addr(), "doc.txt").await.unwrap();
        assert_eq!(again, Transfer::Delivered(b"the quick brown fox".to_vec()));

        server_a.stop().await.unwrap();
        server_b.stop().await.unwrap();
    }

    /// Control endpoint backed by a real session, except that candidate
    /// lists come back sorted by peer id so the try order is fixed.
    async fn start_ordered_tracker(state: TrackerState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((stream, remote)) = listener.accept().await {
                let state = state.clone();
                tokio::spawn(async move {
                    let mut session = Session::new(state.clone(), remote.ip());
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();

                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = match Command::parse(&line) {
                            Ok(Command::GetPeersForResource { resource }) => {
                                let mut candidates = state.directory.candidates_for(&resource);
                                candidates.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
                                Reply::Peers(candidates)
                            }
                            _ => session.handle_line(&line).0,
                        };
                        let encoded = format!("{}\n", reply.encode());
                        if writer.write_all(encoded.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_reroutes_past_failed_candidates() {
        let state = TrackerState::new();
        let tracker_addr = start_ordered_tracker(state.clone()).await;

        // Claims the resource but cannot serve it, and sorts first
        let denier = start_peer(Arc::new(InMemoryStore::new())).await;
        let honest = start_peer(Arc::new(InMemoryStore::new().with_resource("r.bin", "payload"))).await;

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let claim = || BTreeSet::from(["r.bin".to_string()]);
        state.directory.register("denier", localhost, denier.port(), claim());
        state.directory.register("honest", localhost, honest.port(), claim());

        let store = Arc::new(InMemoryStore::new());
        let mut tracker = connect(&tracker_addr).await;
        tracker.register("me", 1, BTreeSet::new()).await.unwrap();
        let orchestrator = Orchestrator::new("me", 1, transfers(), store.clone());

        let report = orchestrator.download(&mut tracker, "r.bin").await.unwrap();
        assert_eq!(report.source.peer_id, "honest");
        assert_eq!(report.attempts, 2);
        assert!(report.catalog_updated);
        assert_eq!(store.read_bytes("r.bin").unwrap(), b"payload");

        let log = state.download_log.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].from_peer, "denier");
        assert_eq!(log[0].to_peer, "me");
        assert!(!log[0].success);
        assert_eq!(log[1].from_peer, "honest");
        assert!(log[1].success);

        assert_eq!(
            state.directory.inspect_holders("r.bin"),
            BTreeSet::from(["honest".to_string(), "me".to_string()])
        );
        let denier_record = state.directory.inspect("denier").unwrap();
        assert!(!denier_record.resources.contains("r.bin"));
        assert!(state.directory.is_consistent());

        denier.stop().await.unwrap();
        honest.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_candidates() {
        let (tracker_addr, state, _shutdown) = start_tracker().await;

        // Registered with a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut tracker = connect(&tracker_addr).await;
        tracker
            .register("ghost", dead_port, BTreeSet::from(["gone.bin".to_string()]))
            .await
            .unwrap();

        let orchestrator = Orchestrator::new("me", 1, transfers(), Arc::new(InMemoryStore::new()));
        let err = orchestrator.download(&mut tracker, "gone.bin").await.unwrap_err();
        assert!(matches!(err, DownloadError::Exhausted { attempts: 1, .. }));

        assert!(!state.directory.list_all().contains_key("gone.bin"));
        let log = state.download_log.snapshot();
        assert_eq!(log.len(), 1);
        assert!(!log[0].success);
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let (tracker_addr, _state, _shutdown) = start_tracker().await;
        let mut tracker = connect(&tracker_addr).await;

        let orchestrator = Orchestrator::new("me", 1, transfers(), Arc::new(InMemoryStore::new()));
        let err = orchestrator.download(&mut tracker, "nothing").await.unwrap_err();
        assert!(matches!(err, DownloadError::ResourceNotFound(ref r) if r == "nothing"));
    }
}
