use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A peer eligible to serve a resource transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub peer_id: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl Candidate {
    pub fn new(peer_id: String, ip: IpAddr, port: u16) -> Self {
        Self { peer_id, ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.peer_id, self.socket_addr())
    }
}
