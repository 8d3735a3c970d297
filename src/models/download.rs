use serde::Serialize;

/// One download attempt reported by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DownloadLogEntry {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub resource: String,
    /// Peer that served (or failed to serve) the resource
    pub from_peer: String,
    /// Peer that requested the resource
    pub to_peer: String,
    pub success: bool,
}

impl DownloadLogEntry {
    pub fn new(
        timestamp: i64,
        resource: String,
        from_peer: String,
        to_peer: String,
        success: bool,
    ) -> Self {
        Self {
            timestamp,
            resource,
            from_peer,
            to_peer,
            success,
        }
    }
}
