use crate::core::error::TrackerClientError;
use crate::models::candidate::Candidate;
use crate::protocol::control::{Command, Reply};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Error as IoError, ErrorKind};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Persistent control-protocol connection from a peer to the tracker.
pub struct TrackerClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
}

impl TrackerClient {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, TrackerClientError> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TrackerClientError::Connect {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(TrackerClientError::Connect {
                    addr: addr.to_string(),
                    source: IoError::new(ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        let (reader, writer) = stream.into_split();
        debug!(tracker = %addr, "Connected to tracker");

        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            io_timeout,
        })
    }

    /// Send one command and read its single reply line.
    async fn round_trip(&mut self, command: &Command) -> Result<Reply, TrackerClientError> {
        let mut line = command.encode();
        line.push('\n');
        let io_timeout = self.io_timeout;

        let exchange = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await?;
            self.lines.next_line().await
        };

        let reply = tokio::time::timeout(io_timeout, exchange)
            .await
            .map_err(|_| IoError::new(ErrorKind::TimedOut, "tracker reply timed out"))??
            .ok_or(TrackerClientError::Closed)?;

        match Reply::decode(&reply)? {
            Reply::Error(description) => {
                warn!(command = command.name(), error = %description, "Tracker rejected command");
                Err(TrackerClientError::Rejected(description))
            }
            reply => Ok(reply),
        }
    }

    fn unexpected(reply: Reply) -> TrackerClientError {
        TrackerClientError::UnexpectedReply(reply.encode())
    }

    #[instrument(skip(self, resources), fields(resources = resources.len()))]
    pub async fn register(
        &mut self,
        peer_id: &str,
        port: u16,
        resources: BTreeSet<String>,
    ) -> Result<(), TrackerClientError> {
        let command = Command::Register {
            peer_id: peer_id.to_string(),
            port,
            resources,
        };
        match self.round_trip(&command).await? {
            Reply::Registered(id) if id == peer_id => {
                info!("Registered with tracker");
                Ok(())
            }
            other => Err(Self::unexpected(other)),
        }
    }

    /// Replace this peer's catalog. `false` when the tracker no longer knows the id.
    #[instrument(skip(self, resources), fields(resources = resources.len()))]
    pub async fn update(
        &mut self,
        peer_id: &str,
        port: u16,
        resources: BTreeSet<String>,
    ) -> Result<bool, TrackerClientError> {
        let command = Command::Update {
            peer_id: peer_id.to_string(),
            port,
            resources,
        };
        match self.round_trip(&command).await? {
            Reply::Updated(id) if id == peer_id => Ok(true),
            Reply::PeerNotFound(_) => Ok(false),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn list_data(
        &mut self,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, TrackerClientError> {
        match self.round_trip(&Command::ListDataRemote).await? {
            Reply::ListData(catalog) => Ok(catalog),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Candidates in tracker order; empty when nobody holds `resource`.
    pub async fn peers_for(&mut self, resource: &str) -> Result<Vec<Candidate>, TrackerClientError> {
        let command = Command::GetPeersForResource {
            resource: resource.to_string(),
        };
        match self.round_trip(&command).await? {
            Reply::Peers(candidates) => Ok(candidates),
            Reply::ResourceNotFound(_) => Ok(Vec::new()),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Report `failed_peer` as unable to serve `resource`; returns the id of
    /// another holder if one remains.
    pub async fn report_failure(
        &mut self,
        resource: &str,
        failed_peer: &str,
    ) -> Result<Option<String>, TrackerClientError> {
        let command = Command::DownloadFail {
            resource: resource.to_string(),
            failed_peer: failed_peer.to_string(),
        };
        match self.round_trip(&command).await? {
            Reply::DownloadPermitted { peer_id, .. } => Ok(Some(peer_id)),
            Reply::ResourceNotFound(_) => Ok(None),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn log_download(
        &mut self,
        resource: &str,
        from_peer: &str,
        to_peer: &str,
        success: bool,
    ) -> Result<(), TrackerClientError> {
        let command = Command::DownloadLog {
            resource: resource.to_string(),
            from_peer: from_peer.to_string(),
            to_peer: to_peer.to_string(),
            success,
        };
        match self.round_trip(&command).await? {
            Reply::LogOk => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Deregister and close the connection.
    pub async fn disconnect(mut self, peer_id: &str) -> Result<(), TrackerClientError> {
        let command = Command::Disconnected {
            peer_id: peer_id.to_string(),
        };
        match self.round_trip(&command).await? {
            Reply::DisconnectedOk(_) => {
                info!(peer_id = %peer_id, "Disconnected from tracker");
                Ok(())
            }
            other => Err(Self::unexpected(other)),
        }
    }
}
