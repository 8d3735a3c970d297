// Shared tracker state

use crate::metrics::collector::{Metrics, MetricsSnapshot};
use crate::stores::{directory::Directory, download_log::DownloadLog};
use std::sync::Arc;

/// Everything a tracker session, the console, and the admin API share.
///
/// Cloning is cheap; every field is an `Arc`.
#[derive(Clone)]
pub struct TrackerState {
    /// Peer/resource directory
    pub directory: Arc<Directory>,

    /// Download attempts reported by peers
    pub download_log: Arc<DownloadLog>,

    pub metrics: Arc<Metrics>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(Directory::new()),
            download_log: Arc::new(DownloadLog::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot(&self.directory, &self.download_log)
    }
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new()
    }
}
