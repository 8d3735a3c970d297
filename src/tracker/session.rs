use crate::core::error::ProtocolError;
use crate::core::state::TrackerState;
use crate::models::download::DownloadLogEntry;
use crate::protocol::control::{Command, Reply};
use crate::utils::time::current_timestamp_millis;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Longest accepted control line, terminator included.
pub const MAX_CONTROL_LINE: u64 = 64 * 1024;

/// What the session loop should do after a reply has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Close,
}

/// Protocol state for one control connection.
pub struct Session {
    state: TrackerState,
    remote_ip: IpAddr,
    /// Last peer id this connection registered or updated
    peer_id: Option<String>,
}

impl Session {
    pub fn new(state: TrackerState, remote_ip: IpAddr) -> Self {
        Self {
            state,
            remote_ip,
            peer_id: None,
        }
    }

    /// Parse and execute one command line.
    pub fn handle_line(&mut self, line: &str) -> (Reply, Next) {
        match Command::parse(line) {
            Ok(command) => {
                self.state.metrics.increment_commands();
                self.execute(command)
            }
            Err(err) => self.reject(err),
        }
    }

    /// Decode one raw line and handle it. Blank lines yield `None`.
    pub fn handle_bytes(&mut self, raw: &[u8]) -> Option<(Reply, Next)> {
        match std::str::from_utf8(raw) {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(self.handle_line(line)),
            Err(e) => Some(self.reject(ProtocolError::InvalidEncoding {
                valid_up_to: e.valid_up_to(),
            })),
        }
    }

    fn reject(&mut self, err: ProtocolError) -> (Reply, Next) {
        self.state.metrics.increment_commands();
        self.state.metrics.increment_rejected();
        warn!(remote = %self.remote_ip, error = %err, "Rejected command");
        (Reply::error(&err), Next::Continue)
    }

    pub fn execute(&mut self, command: Command) -> (Reply, Next) {
        let directory = &self.state.directory;

        match command {
            Command::Register {
                peer_id,
                port,
                resources,
            } => {
                let count = resources.len();
                directory.register(&peer_id, self.remote_ip, port, resources);
                self.state.metrics.increment_registrations();
                info!(
                    peer_id = %peer_id,
                    ip = %self.remote_ip,
                    port = port,
                    resources = count,
                    "Peer registered"
                );
                self.peer_id = Some(peer_id.clone());
                (Reply::Registered(peer_id), Next::Continue)
            }
            Command::Update {
                peer_id, resources, ..
            } => {
                let count = resources.len();
                if directory.update(&peer_id, resources) {
                    info!(peer_id = %peer_id, resources = count, "Peer catalog updated");
                    self.peer_id = Some(peer_id.clone());
                    (Reply::Updated(peer_id), Next::Continue)
                } else {
                    warn!(peer_id = %peer_id, "Update for unregistered peer");
                    (Reply::PeerNotFound(peer_id), Next::Continue)
                }
            }
            Command::ListDataRemote => (Reply::ListData(directory.list_all()), Next::Continue),
            Command::GetPeersForResource { resource } => {
                let candidates = directory.candidates_for(&resource);
                debug!(resource = %resource, candidates = candidates.len(), "Candidates requested");
                if candidates.is_empty() {
                    (Reply::ResourceNotFound(resource), Next::Continue)
                } else {
                    (Reply::Peers(candidates), Next::Continue)
                }
            }
            Command::DownloadFail {
                resource,
                failed_peer,
            } => {
                self.state.metrics.increment_failure_reports();
                let next = directory.report_failure(&resource, &failed_peer);
                info!(
                    resource = %resource,
                    failed_peer = %failed_peer,
                    next_peer = ?next.as_ref().map(|c| c.peer_id.as_str()),
                    "Holder deindexed after failed download"
                );
                match next {
                    Some(candidate) => (
                        Reply::DownloadPermitted {
                            resource,
                            peer_id: candidate.peer_id,
                        },
                        Next::Continue,
                    ),
                    None => (Reply::ResourceNotFound(resource), Next::Continue),
                }
            }
            Command::DownloadLog {
                resource,
                from_peer,
                to_peer,
                success,
            } => {
                self.state.download_log.append(DownloadLogEntry::new(
                    current_timestamp_millis(),
                    resource,
                    from_peer,
                    to_peer,
                    success,
                ));
                (Reply::LogOk, Next::Continue)
            }
            Command::Disconnected { peer_id } => {
                if directory.remove(&peer_id).is_some() {
                    self.state.metrics.increment_disconnects();
                    info!(peer_id = %peer_id, "Peer disconnected");
                } else {
                    debug!(peer_id = %peer_id, "Disconnect for unknown peer");
                }
                self.peer_id = None;
                (Reply::DisconnectedOk(peer_id), Next::Close)
            }
        }
    }

    /// Serve commands until the stream ends, DISCONNECTED is processed, an
    /// I/O error occurs, or shutdown is signalled between commands.
    #[instrument(skip_all, fields(remote = %self.remote_ip))]
    pub async fn run<S>(mut self, stream: S, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state.metrics.session_opened();
        let result = self.serve(stream, &mut shutdown).await;
        self.state.metrics.session_closed();

        if let Some(peer_id) = &self.peer_id {
            // No DISCONNECTED was received; the registration is kept.
            warn!(peer_id = %peer_id, "Session ended without disconnect, peer stays registered");
        }

        result
    }

    async fn serve<S>(&mut self, stream: S, shutdown: &mut watch::Receiver<bool>) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        // Partial reads survive a cancelled select branch in `buf`
        let mut buf = Vec::new();
        // Set after an oversized line until its terminator is consumed
        let mut discarding = false;

        loop {
            if *shutdown.borrow() {
                debug!("Shutdown requested, closing session");
                return Ok(());
            }

            let remaining = MAX_CONTROL_LINE.saturating_sub(buf.len() as u64);
            let mut limited = (&mut reader).take(remaining);
            let read = tokio::select! {
                read = limited.read_until(b'\n', &mut buf) => read?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            let terminated = buf.last() == Some(&b'\n');
            if !terminated {
                if buf.len() as u64 >= MAX_CONTROL_LINE {
                    buf.clear();
                    if !discarding {
                        discarding = true;
                        let reply = self.reject(ProtocolError::LineTooLong {
                            limit: MAX_CONTROL_LINE,
                        });
                        write_reply(&mut writer, &reply.0).await?;
                    }
                    continue;
                }
                if read > 0 {
                    // Unterminated tail; the next read reports end of stream
                    continue;
                }
                if buf.is_empty() || discarding {
                    debug!("Control stream closed by peer");
                    return Ok(());
                }
            }

            if discarding {
                discarding = false;
                buf.clear();
                continue;
            }

            let raw = std::mem::take(&mut buf);
            let Some((reply, next)) = self.handle_bytes(&raw) else {
                if terminated {
                    continue;
                }
                return Ok(());
            };
            write_reply(&mut writer, &reply).await?;

            if next == Next::Close || !terminated {
                return Ok(());
            }
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = reply.encode();
    encoded.push('\n');
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await
}
