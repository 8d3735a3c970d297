use crate::stores::directory::Directory;
use crate::stores::download_log::DownloadLog;
use crate::utils::time::{age_seconds, current_timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracker-wide counters, updated lock-free from every session.
pub struct Metrics {
    pub sessions_opened: AtomicU64,
    pub sessions_active: AtomicU64,
    pub commands_total: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub registrations: AtomicU64,
    pub disconnects: AtomicU64,
    pub failure_reports: AtomicU64,
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub commands_total: u64,
    pub commands_rejected: u64,
    pub rejection_rate: f64,
    pub registrations: u64,
    pub disconnects: u64,
    pub failure_reports: u64,
    pub registered_peers: usize,
    pub indexed_resources: usize,
    pub download_log_entries: usize,
    pub uptime_seconds: i64,
    pub commands_per_second: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            commands_total: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            failure_reports: AtomicU64::new(0),
            start_time: current_timestamp(),
        }
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_commands(&self) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_registrations(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_disconnects(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failure_reports(&self) {
        self.failure_reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters plus directory sizes and derived rates.
    pub fn get_snapshot(&self, directory: &Directory, download_log: &DownloadLog) -> MetricsSnapshot {
        let commands_total = self.commands_total.load(Ordering::Relaxed);
        let commands_rejected = self.commands_rejected.load(Ordering::Relaxed);

        let rejection_rate = if commands_total > 0 {
            (commands_rejected as f64 / commands_total as f64) * 100.0
        } else {
            0.0
        };

        let uptime_seconds = age_seconds(self.start_time, current_timestamp());

        let commands_per_second = if uptime_seconds > 0 {
            commands_total as f64 / uptime_seconds as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            commands_total,
            commands_rejected,
            rejection_rate,
            registrations: self.registrations.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            failure_reports: self.failure_reports.load(Ordering::Relaxed),
            registered_peers: directory.peer_count(),
            indexed_resources: directory.resource_count(),
            download_log_entries: download_log.len(),
            uptime_seconds,
            commands_per_second,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
