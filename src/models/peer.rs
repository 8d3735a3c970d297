use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;

/// A registered peer as the tracker sees it.
///
/// Records are never mutated in place. Registration and update build a fresh
/// record and swap it into the directory, so a reader holding an `Arc` to an
/// older record keeps a consistent view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    /// Opaque peer identifier chosen by the peer
    pub id: String,
    /// Address taken from the peer's control connection
    pub ip: IpAddr,
    /// Port the peer listens on for transfers
    pub port: u16,
    /// Resources the peer currently claims to hold
    pub resources: BTreeSet<String>,
    /// Unix timestamp (seconds) of the last register/update
    pub last_update: i64,
}

impl PeerRecord {
    pub fn new(
        id: String,
        ip: IpAddr,
        port: u16,
        resources: BTreeSet<String>,
        last_update: i64,
    ) -> Self {
        Self {
            id,
            ip,
            port,
            resources,
            last_update,
        }
    }

    /// Same identity and address, new resource set and timestamp.
    pub fn with_resources(&self, resources: BTreeSet<String>, last_update: i64) -> Self {
        Self {
            id: self.id.clone(),
            ip: self.ip,
            port: self.port,
            resources,
            last_update,
        }
    }

    pub fn holds(&self, resource: &str) -> bool {
        self.resources.contains(resource)
    }
}
