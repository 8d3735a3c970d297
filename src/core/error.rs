// Centralized error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Rejections produced while parsing a control-protocol line.
///
/// These never close a session; the display text becomes the body of an
/// `ERROR` reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("EMPTY_COMMAND")]
    Empty,

    #[error("UNKNOWN_COMMAND {0}")]
    UnknownCommand(String),

    #[error("Missing arguments for {command}")]
    MissingArguments { command: &'static str },

    #[error("Too many arguments for {command}")]
    TooManyArguments { command: &'static str },

    #[error("Invalid {field} for {command}: {value}")]
    InvalidNumber {
        command: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Resource count mismatch for {command}: declared {declared}, supplied {supplied}")]
    CountMismatch {
        command: &'static str,
        declared: usize,
        supplied: usize,
    },

    #[error("Invalid success flag for DOWNLOAD_LOG: {0}")]
    InvalidFlag(String),

    #[error("INVALID_ENCODING Command line is not valid UTF-8 (at byte {valid_up_to})")]
    InvalidEncoding { valid_up_to: usize },

    #[error("LINE_TOO_LONG Command line exceeds {limit} bytes")]
    LineTooLong { limit: u64 },
}

/// Failures of a single peer-to-peer transfer attempt.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out talking to {0}")]
    Timeout(String),

    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed before a reply was received")]
    ConnectionClosed,

    #[error("Transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("Invalid payload length: {0}")]
    InvalidLength(String),

    #[error("Unexpected reply from peer: {0}")]
    UnexpectedReply(String),
}

/// Failures talking to the tracker over the control protocol.
#[derive(Error, Debug)]
pub enum TrackerClientError {
    #[error("Failed to connect to tracker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on tracker connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker closed the connection")]
    Closed,

    #[error("Tracker rejected the command: {0}")]
    Rejected(String),

    #[error("Unexpected reply from tracker: {0}")]
    UnexpectedReply(String),

    #[error("Malformed reply from tracker: {0}")]
    Malformed(String),
}

/// Local resource storage faults.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a whole download that did not produce the resource.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("All {attempts} candidates failed for {resource}")]
    Exhausted { resource: String, attempts: usize },

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerClientError),

    #[error("Failed to store downloaded resource: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
