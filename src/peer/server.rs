use crate::core::error::{StorageError, TransferError};
use crate::peer::lock_table::ResourceLocks;
use crate::peer::storage::ResourceStore;
use crate::protocol::transfer::{data_preamble, denied_line, parse_request, RequestRejection};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// Longest request line accepted from a requester.
const MAX_REQUEST_LINE: u64 = 4096;

#[derive(Debug, Clone)]
pub struct TransferServerConfig {
    pub poll_interval: Duration,
    pub io_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for TransferServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            io_timeout: Duration::from_millis(30_000),
            shutdown_grace: Duration::from_millis(2_000),
        }
    }
}

/// Serves `DOWNLOAD_REQUEST`s from other peers, one task per connection.
pub struct TransferServer {
    listener: TcpListener,
    store: Arc<dyn ResourceStore>,
    locks: Arc<ResourceLocks>,
    config: TransferServerConfig,
}

/// Running server: its address and the means to stop it.
pub struct TransferServerHandle {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl TransferServer {
    pub async fn bind(
        addr: &str,
        store: Arc<dyn ResourceStore>,
        config: TransferServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind transfer listener to {}", addr))?;

        Ok(Self {
            listener,
            store,
            locks: Arc::new(ResourceLocks::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read transfer listener address")
    }

    pub fn spawn(self) -> Result<TransferServerHandle> {
        let local_addr = self.local_addr()?;
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));

        Ok(TransferServerHandle {
            local_addr,
            stop,
            task,
        })
    }

    /// Accept with a bounded wait so `stop` is noticed within one poll interval.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<()> {
        let mut transfers = JoinSet::new();
        let local_addr = self.local_addr()?;

        info!(address = %local_addr, "Transfer server accepting connections");

        while !*stop.borrow() {
            while let Some(finished) = transfers.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Transfer task failed");
                }
            }

            let accepted =
                match tokio::time::timeout(self.config.poll_interval, self.listener.accept()).await {
                    Ok(accepted) => accepted,
                    Err(_) => continue,
                };

            let (stream, remote) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept transfer connection");
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let locks = Arc::clone(&self.locks);
            let io_timeout = self.config.io_timeout;
            transfers.spawn(async move {
                if let Err(e) = serve_connection(stream, remote, store, locks, io_timeout).await {
                    warn!(remote = %remote, error = %e, "Transfer connection failed");
                }
            });
        }

        drop(self.listener);
        info!(in_flight = transfers.len(), "Transfer server stopping");

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while transfers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = transfers.len(), "Aborting unfinished transfers");
            transfers.shutdown().await;
        }

        Ok(())
    }
}

impl TransferServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Request a stop and wait for the accept loop and in-flight transfers.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.task.await.context("Transfer server task panicked")?
    }
}

/// Handle exactly one request on `stream`, then return.
#[instrument(skip(stream, store, locks, io_timeout))]
pub async fn serve_connection<S>(
    stream: S,
    remote: SocketAddr,
    store: Arc<dyn ResourceStore>,
    locks: Arc<ResourceLocks>,
    io_timeout: Duration,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_LINE));

    let mut raw = Vec::new();
    let read = tokio::time::timeout(io_timeout, reader.read_until(b'\n', &mut raw))
        .await
        .map_err(|_| TransferError::Timeout(remote.to_string()))??;
    if read == 0 {
        debug!("Requester closed before sending a request");
        return Ok(());
    }

    let parsed = match std::str::from_utf8(&raw) {
        Ok(line) => parse_request(line).map(str::to_string),
        Err(_) => Err(RequestRejection::Unsupported),
    };
    let name = match parsed {
        Ok(name) => name,
        Err(rejection) => {
            debug!(request = %String::from_utf8_lossy(&raw).trim_end(), "Rejecting transfer request");
            write_all(&mut writer, rejection.reply().as_bytes(), io_timeout, remote).await?;
            return Ok(());
        }
    };

    let _guard = locks.acquire(&name).await;

    let lookup = {
        let store = Arc::clone(&store);
        let name = name.clone();
        tokio::task::spawn_blocking(move || store.read_bytes(&name))
            .await
            .map_err(std::io::Error::other)?
    };

    match lookup {
        Ok(bytes) => {
            let preamble = data_preamble(&name, bytes.len() as u64);
            write_all(&mut writer, preamble.as_bytes(), io_timeout, remote).await?;
            write_all(&mut writer, &bytes, io_timeout, remote).await?;
            info!(resource = %name, bytes = bytes.len(), "Resource sent");
        }
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidName(_)) => {
            debug!(resource = %name, "Resource not held, denying");
            write_all(&mut writer, denied_line(&name).as_bytes(), io_timeout, remote).await?;
        }
        Err(StorageError::Io(e)) => {
            warn!(resource = %name, error = %e, "Failed to read resource, denying");
            write_all(&mut writer, denied_line(&name).as_bytes(), io_timeout, remote).await?;
        }
    }

    Ok(())
}

async fn write_all<W>(
    writer: &mut W,
    bytes: &[u8],
    io_timeout: Duration,
    remote: SocketAddr,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(io_timeout, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| TransferError::Timeout(remote.to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::storage::InMemoryStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpStream;

    fn test_config() -> TransferServerConfig {
        TransferServerConfig {
            poll_interval: Duration::from_millis(20),
            io_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    async fn start(store: Arc<dyn ResourceStore>) -> TransferServerHandle {
        TransferServer::bind("127.0.0.1:0", store, test_config())
            .await
            .unwrap()
            .spawn()
            .unwrap()
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_sends_held_resource() {
        let store = Arc::new(InMemoryStore::new().with_resource("doc.txt", "line one\nline two"));
        let server = start(store).await;

        let reply = exchange(server.local_addr(), b"DOWNLOAD_REQUEST doc.txt\n").await;
        assert_eq!(reply, b"DOWNLOAD_DATA doc.txt\n17\nline one\nline two");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_denies_absent_resource() {
        let server = start(Arc::new(InMemoryStore::new())).await;

        let reply = exchange(server.local_addr(), b"DOWNLOAD_REQUEST nope.bin\n").await;
        assert_eq!(reply, b"DOWNLOAD_DENIED nope.bin\n");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_malformed_requests() {
        let server = start(Arc::new(InMemoryStore::new())).await;

        let reply = exchange(server.local_addr(), b"DOWNLOAD_REQUEST a b\n").await;
        assert_eq!(reply, b"DOWNLOAD_DENIED INVALID_FORMAT\n");

        let reply = exchange(server.local_addr(), b"UPLOAD a\n").await;
        assert_eq!(reply, b"ERROR Unsupported or malformed request\n");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let server = start(Arc::new(InMemoryStore::new())).await;
        let addr = server.local_addr();

        tokio::time::timeout(Duration::from_secs(2), server.stop())
            .await
            .expect("stop should finish within a few poll intervals")
            .unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    /// Store whose reads take a while and record how many overlap.
    struct SlowStore {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl SlowStore {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
    }

    impl ResourceStore for SlowStore {
        fn list_local_resource_names(&self) -> BTreeSet<String> {
            BTreeSet::new()
        }

        fn exists(&self, _name: &str) -> bool {
            true
        }

        fn read_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(name.as_bytes().to_vec())
        }

        fn write_bytes(&self, _name: &str, _bytes: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_request_gets_error_reply() {
        let (mut client, server) = tokio::io::duplex(1024);
        let remote: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let handle = tokio::spawn(serve_connection(
            server,
            remote,
            Arc::new(InMemoryStore::new()),
            Arc::new(ResourceLocks::new()),
            Duration::from_secs(5),
        ));

        client.write_all(b"DOWNLOAD_REQUEST \xff\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ERROR Unsupported or malformed request\n");

        handle.await.unwrap().unwrap();
    }

    async fn concurrent_requests(names: [&str; 2]) -> usize {
        let store = Arc::new(SlowStore::new());
        let server = start(store.clone()).await;
        let addr = server.local_addr();

        let requests = names.map(|name| {
            let request = format!("DOWNLOAD_REQUEST {name}\n");
            tokio::spawn(async move { exchange(addr, request.as_bytes()).await })
        });
        for request in requests {
            let reply = request.await.unwrap();
            assert!(reply.starts_with(b"DOWNLOAD_DATA "));
        }

        server.stop().await.unwrap();
        store.max_active.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_resource_is_serialized() {
        assert_eq!(concurrent_requests(["shared.bin", "shared.bin"]).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_resources_overlap() {
        assert_eq!(concurrent_requests(["a.bin", "b.bin"]).await, 2);
    }
}
