use crate::models::download::DownloadLogEntry;
use std::sync::{Mutex, PoisonError};

/// Append-only record of download attempts.
///
/// Independent of the directory lock; appends only contend with each other
/// and with snapshot copies.
pub struct DownloadLog {
    entries: Mutex<Vec<DownloadLogEntry>>,
}

impl DownloadLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, entry: DownloadLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Copy of every entry in insertion order.
    pub fn snapshot(&self) -> Vec<DownloadLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DownloadLog {
    fn default() -> Self {
        Self::new()
    }
}
