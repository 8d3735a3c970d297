use crate::core::error::TransferError;
use crate::protocol::transfer::{request_line, ReplyHeader};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of a transfer that completed the protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Delivered(Vec<u8>),
    Denied,
}

/// Fetches one resource from one peer. No retries.
#[derive(Debug, Clone)]
pub struct TransferClient {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TransferClient {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, addr: SocketAddr, name: &str) -> Result<Transfer, TransferError> {
        let target = addr.to_string();

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransferError::Timeout(target.clone()))?
            .map_err(|source| TransferError::Connect {
                addr: target.clone(),
                source,
            })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        self.bounded(&target, async {
            writer.write_all(request_line(name).as_bytes()).await?;
            writer.flush().await
        })
        .await?;

        let header = self.read_line(&mut reader, &target).await?;
        match ReplyHeader::parse(&header) {
            ReplyHeader::Denied => {
                debug!("Peer denied the request");
                return Ok(Transfer::Denied);
            }
            ReplyHeader::Other(reply) => return Err(TransferError::UnexpectedReply(reply)),
            ReplyHeader::Data => {}
        }

        let length_line = self.read_line(&mut reader, &target).await?;
        let length_text = length_line.trim();
        let expected: u64 = length_text
            .parse()
            .map_err(|_| TransferError::InvalidLength(length_text.to_string()))?;

        let mut payload = Vec::with_capacity(usize::try_from(expected).unwrap_or(0).min(READ_CHUNK));
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut received: u64 = 0;

        while received < expected {
            let want = usize::try_from(expected - received)
                .unwrap_or(READ_CHUNK)
                .min(READ_CHUNK);
            let read = self
                .bounded(&target, reader.read(&mut chunk[..want]))
                .await?;
            if read == 0 {
                return Err(TransferError::Truncated { expected, received });
            }
            payload.extend_from_slice(&chunk[..read]);
            received += read as u64;
        }

        debug!(bytes = received, "Transfer complete");
        Ok(Transfer::Delivered(payload))
    }

    async fn read_line(
        &self,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        target: &str,
    ) -> Result<String, TransferError> {
        let mut line = String::new();
        let read = self.bounded(target, reader.read_line(&mut line)).await?;
        if read == 0 {
            return Err(TransferError::ConnectionClosed);
        }
        Ok(line)
    }

    async fn bounded<T, F>(&self, target: &str, io: F) -> Result<T, TransferError>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        tokio::time::timeout(self.io_timeout, io)
            .await
            .map_err(|_| TransferError::Timeout(target.to_string()))?
            .map_err(TransferError::from)
    }
}
