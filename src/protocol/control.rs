//! Line-oriented control protocol spoken between peers and the tracker.
//!
//! Every command and every reply is a single line of whitespace-separated
//! tokens. Variable-length replies carry a count before each repeated group
//! so they can be decoded without a terminator.

use crate::core::error::{ProtocolError, TrackerClientError};
use crate::models::candidate::Candidate;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

pub const REGISTER: &str = "REGISTER";
pub const UPDATE: &str = "UPDATE";
pub const LIST_DATA_REMOTE: &str = "LIST_DATA_REMOTE";
pub const GET_PEERS_FOR_RESOURCE: &str = "GET_PEERS_FOR_RESOURCE";
pub const DOWNLOAD_FAIL: &str = "DOWNLOAD_FAIL";
pub const DOWNLOAD_LOG: &str = "DOWNLOAD_LOG";
pub const DISCONNECTED: &str = "DISCONNECTED";

pub const REGISTERED: &str = "REGISTERED";
pub const UPDATED: &str = "UPDATED";
pub const PEER_NOT_FOUND: &str = "PEER_NOT_FOUND";
pub const LIST_DATA_RESPONSE: &str = "LIST_DATA_RESPONSE";
pub const PEER_FOR_RESOURCE: &str = "PEER_FOR_RESOURCE";
pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
pub const DOWNLOAD_PERMITTED: &str = "DOWNLOAD_PERMITTED";
pub const LOG_OK: &str = "LOG_OK";
pub const DISCONNECTED_OK: &str = "DISCONNECTED_OK";
pub const ERROR: &str = "ERROR";

/// A parsed peer → tracker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        peer_id: String,
        port: u16,
        resources: BTreeSet<String>,
    },
    Update {
        peer_id: String,
        port: u16,
        resources: BTreeSet<String>,
    },
    ListDataRemote,
    GetPeersForResource {
        resource: String,
    },
    DownloadFail {
        resource: String,
        failed_peer: String,
    },
    DownloadLog {
        resource: String,
        from_peer: String,
        to_peer: String,
        success: bool,
    },
    Disconnected {
        peer_id: String,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&name, args) = tokens.split_first().ok_or(ProtocolError::Empty)?;

        match name {
            REGISTER => {
                let (peer_id, port, resources) = parse_catalog(REGISTER, args)?;
                Ok(Command::Register {
                    peer_id,
                    port,
                    resources,
                })
            }
            UPDATE => {
                let (peer_id, port, resources) = parse_catalog(UPDATE, args)?;
                Ok(Command::Update {
                    peer_id,
                    port,
                    resources,
                })
            }
            LIST_DATA_REMOTE => {
                expect_arity(LIST_DATA_REMOTE, args, 0)?;
                Ok(Command::ListDataRemote)
            }
            GET_PEERS_FOR_RESOURCE => {
                expect_arity(GET_PEERS_FOR_RESOURCE, args, 1)?;
                Ok(Command::GetPeersForResource {
                    resource: args[0].to_string(),
                })
            }
            DOWNLOAD_FAIL => {
                expect_arity(DOWNLOAD_FAIL, args, 2)?;
                Ok(Command::DownloadFail {
                    resource: args[0].to_string(),
                    failed_peer: args[1].to_string(),
                })
            }
            DOWNLOAD_LOG => {
                expect_arity(DOWNLOAD_LOG, args, 4)?;
                let success = match args[3].to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(ProtocolError::InvalidFlag(args[3].to_string())),
                };
                Ok(Command::DownloadLog {
                    resource: args[0].to_string(),
                    from_peer: args[1].to_string(),
                    to_peer: args[2].to_string(),
                    success,
                })
            }
            DISCONNECTED => {
                expect_arity(DISCONNECTED, args, 1)?;
                Ok(Command::Disconnected {
                    peer_id: args[0].to_string(),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => REGISTER,
            Command::Update { .. } => UPDATE,
            Command::ListDataRemote => LIST_DATA_REMOTE,
            Command::GetPeersForResource { .. } => GET_PEERS_FOR_RESOURCE,
            Command::DownloadFail { .. } => DOWNLOAD_FAIL,
            Command::DownloadLog { .. } => DOWNLOAD_LOG,
            Command::Disconnected { .. } => DISCONNECTED,
        }
    }

    /// Wire form without the line terminator.
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(64);
        line.push_str(self.name());

        match self {
            Command::Register {
                peer_id,
                port,
                resources,
            }
            | Command::Update {
                peer_id,
                port,
                resources,
            } => {
                push_token(&mut line, peer_id);
                push_number(&mut line, *port);
                push_number(&mut line, resources.len());
                for resource in resources {
                    push_token(&mut line, resource);
                }
            }
            Command::ListDataRemote => {}
            Command::GetPeersForResource { resource } => push_token(&mut line, resource),
            Command::DownloadFail {
                resource,
                failed_peer,
            } => {
                push_token(&mut line, resource);
                push_token(&mut line, failed_peer);
            }
            Command::DownloadLog {
                resource,
                from_peer,
                to_peer,
                success,
            } => {
                push_token(&mut line, resource);
                push_token(&mut line, from_peer);
                push_token(&mut line, to_peer);
                push_token(&mut line, if *success { "true" } else { "false" });
            }
            Command::Disconnected { peer_id } => push_token(&mut line, peer_id),
        }

        line
    }
}

fn expect_arity(command: &'static str, args: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if args.len() < expected {
        Err(ProtocolError::MissingArguments { command })
    } else if args.len() > expected {
        Err(ProtocolError::TooManyArguments { command })
    } else {
        Ok(())
    }
}

/// `<peerId> <listenPort> <n> <r1> ... <rn>`
fn parse_catalog(
    command: &'static str,
    args: &[&str],
) -> Result<(String, u16, BTreeSet<String>), ProtocolError> {
    if args.len() < 3 {
        return Err(ProtocolError::MissingArguments { command });
    }

    let port = match args[1].parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            return Err(ProtocolError::InvalidNumber {
                command,
                field: "listen port",
                value: args[1].to_string(),
            })
        }
    };

    let declared = args[2]
        .parse::<usize>()
        .map_err(|_| ProtocolError::InvalidNumber {
            command,
            field: "resource count",
            value: args[2].to_string(),
        })?;

    let names = &args[3..];
    if names.len() != declared {
        return Err(ProtocolError::CountMismatch {
            command,
            declared,
            supplied: names.len(),
        });
    }

    Ok((
        args[0].to_string(),
        port,
        names.iter().map(|name| name.to_string()).collect(),
    ))
}

fn push_token(line: &mut String, token: &str) {
    line.push(' ');
    line.push_str(token);
}

fn push_number<N: itoa::Integer>(line: &mut String, value: N) {
    let mut buf = itoa::Buffer::new();
    line.push(' ');
    line.push_str(buf.format(value));
}

/// A tracker → peer reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Registered(String),
    Updated(String),
    PeerNotFound(String),
    ListData(BTreeMap<String, BTreeSet<String>>),
    Peers(Vec<Candidate>),
    ResourceNotFound(String),
    DownloadPermitted { resource: String, peer_id: String },
    LogOk,
    DisconnectedOk(String),
    Error(String),
}

impl Reply {
    pub fn error(err: &ProtocolError) -> Self {
        Reply::Error(err.to_string())
    }

    /// Wire form without the line terminator.
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(64);

        match self {
            Reply::Registered(peer_id) => {
                line.push_str(REGISTERED);
                push_token(&mut line, peer_id);
            }
            Reply::Updated(peer_id) => {
                line.push_str(UPDATED);
                push_token(&mut line, peer_id);
            }
            Reply::PeerNotFound(peer_id) => {
                line.push_str(PEER_NOT_FOUND);
                push_token(&mut line, peer_id);
            }
            Reply::ListData(all) => {
                line.push_str(LIST_DATA_RESPONSE);
                push_number(&mut line, all.len());
                for (resource, holders) in all {
                    push_token(&mut line, resource);
                    push_number(&mut line, holders.len());
                    for holder in holders {
                        push_token(&mut line, holder);
                    }
                }
            }
            Reply::Peers(candidates) => {
                line.push_str(PEER_FOR_RESOURCE);
                push_number(&mut line, candidates.len());
                for candidate in candidates {
                    push_token(&mut line, &candidate.peer_id);
                    push_token(&mut line, &candidate.ip.to_string());
                    push_number(&mut line, candidate.port);
                }
            }
            Reply::ResourceNotFound(resource) => {
                line.push_str(RESOURCE_NOT_FOUND);
                push_token(&mut line, resource);
            }
            Reply::DownloadPermitted { resource, peer_id } => {
                line.push_str(DOWNLOAD_PERMITTED);
                push_token(&mut line, resource);
                push_token(&mut line, peer_id);
            }
            Reply::LogOk => line.push_str(LOG_OK),
            Reply::DisconnectedOk(peer_id) => {
                line.push_str(DISCONNECTED_OK);
                push_token(&mut line, peer_id);
            }
            Reply::Error(message) => {
                line.push_str(ERROR);
                push_token(&mut line, message);
            }
        }

        line
    }

    pub fn decode(line: &str) -> Result<Self, TrackerClientError> {
        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| TrackerClientError::Malformed("empty reply".to_string()))?;

        let reply = match name {
            REGISTERED => Reply::Registered(next_token(&mut tokens, name)?),
            UPDATED => Reply::Updated(next_token(&mut tokens, name)?),
            PEER_NOT_FOUND => Reply::PeerNotFound(next_token(&mut tokens, name)?),
            RESOURCE_NOT_FOUND => Reply::ResourceNotFound(next_token(&mut tokens, name)?),
            DISCONNECTED_OK => Reply::DisconnectedOk(next_token(&mut tokens, name)?),
            LOG_OK => Reply::LogOk,
            DOWNLOAD_PERMITTED => Reply::DownloadPermitted {
                resource: next_token(&mut tokens, name)?,
                peer_id: next_token(&mut tokens, name)?,
            },
            LIST_DATA_RESPONSE => {
                let count: usize = next_number(&mut tokens, name)?;
                let mut all = BTreeMap::new();
                for _ in 0..count {
                    let resource = next_token(&mut tokens, name)?;
                    let holders: usize = next_number(&mut tokens, name)?;
                    let ids = (0..holders)
                        .map(|_| next_token(&mut tokens, name))
                        .collect::<Result<BTreeSet<_>, _>>()?;
                    all.insert(resource, ids);
                }
                Reply::ListData(all)
            }
            PEER_FOR_RESOURCE => {
                let count: usize = next_number(&mut tokens, name)?;
                let mut candidates = Vec::with_capacity(count);
                for _ in 0..count {
                    let peer_id = next_token(&mut tokens, name)?;
                    let ip: IpAddr = next_number(&mut tokens, name)?;
                    let port: u16 = next_number(&mut tokens, name)?;
                    candidates.push(Candidate::new(peer_id, ip, port));
                }
                Reply::Peers(candidates)
            }
            ERROR => {
                let message = tokens.by_ref().collect::<Vec<_>>().join(" ");
                return Ok(Reply::Error(message));
            }
            other => return Err(TrackerClientError::UnexpectedReply(other.to_string())),
        };

        if let Some(extra) = tokens.next() {
            return Err(TrackerClientError::Malformed(format!(
                "trailing token '{extra}' in {name} reply"
            )));
        }

        Ok(reply)
    }
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    reply: &str,
) -> Result<String, TrackerClientError> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or_else(|| TrackerClientError::Malformed(format!("truncated {reply} reply")))
}

fn next_number<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    reply: &str,
) -> Result<T, TrackerClientError> {
    let token = next_token(tokens, reply)?;
    token
        .parse()
        .map_err(|_| TrackerClientError::Malformed(format!("invalid field '{token}' in {reply} reply")))
}
