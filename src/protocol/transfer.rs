//! Peer-to-peer transfer protocol.
//!
//! Request: `DOWNLOAD_REQUEST <name>\n`. A successful reply is the header
//! `DOWNLOAD_DATA <name>\n`, the decimal payload length on its own line, then
//! exactly that many raw bytes. A refusal is `DOWNLOAD_DENIED <name>\n`.

pub const DOWNLOAD_REQUEST: &str = "DOWNLOAD_REQUEST";
pub const DOWNLOAD_DATA: &str = "DOWNLOAD_DATA";
pub const DOWNLOAD_DENIED: &str = "DOWNLOAD_DENIED";

pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
pub const UNSUPPORTED_REPLY: &str = "ERROR Unsupported or malformed request";

/// Why a transfer request line was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRejection {
    /// Right command, wrong number of tokens
    InvalidFormat,
    /// Not a transfer request at all
    Unsupported,
}

impl RequestRejection {
    pub fn reply(&self) -> String {
        match self {
            RequestRejection::InvalidFormat => denied_line(INVALID_FORMAT),
            RequestRejection::Unsupported => format!("{UNSUPPORTED_REPLY}\n"),
        }
    }
}

/// Extract the resource name from a request line.
pub fn parse_request(line: &str) -> Result<&str, RequestRejection> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(DOWNLOAD_REQUEST) {
        return Err(RequestRejection::Unsupported);
    }
    match (tokens.next(), tokens.next()) {
        (Some(name), None) => Ok(name),
        _ => Err(RequestRejection::InvalidFormat),
    }
}

pub fn request_line(name: &str) -> String {
    format!("{DOWNLOAD_REQUEST} {name}\n")
}

/// Header and length lines that precede a payload of `len` bytes.
pub fn data_preamble(name: &str, len: u64) -> String {
    let mut buf = itoa::Buffer::new();
    format!("{DOWNLOAD_DATA} {name}\n{}\n", buf.format(len))
}

pub fn denied_line(name: &str) -> String {
    format!("{DOWNLOAD_DENIED} {name}\n")
}

/// First line of a transfer reply as seen by the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyHeader {
    Data,
    Denied,
    Other(String),
}

impl ReplyHeader {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.split_whitespace().next() {
            Some(DOWNLOAD_DATA) => ReplyHeader::Data,
            Some(DOWNLOAD_DENIED) => ReplyHeader::Denied,
            _ => ReplyHeader::Other(line.to_string()),
        }
    }
}
