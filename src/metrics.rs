//! Metrics Collection
//!
//! Counters for monitoring the host database and its scan loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the host database
#[derive(Debug)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Instant,

    /// Hosts inserted since startup
    pub hosts_inserted: AtomicU64,

    /// Hosts removed since startup
    pub hosts_removed: AtomicU64,

    /// Probes that completed successfully
    pub scans_succeeded: AtomicU64,

    /// Probes that failed or timed out
    pub scans_failed: AtomicU64,

    /// Random-selection requests served
    pub samples_served: AtomicU64,

    /// Snapshot flushes written to disk
    pub snapshots_written: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            hosts_inserted: AtomicU64::new(0),
            hosts_removed: AtomicU64::new(0),
            scans_succeeded: AtomicU64::new(0),
            scans_failed: AtomicU64::new(0),
            samples_served: AtomicU64::new(0),
            snapshots_written: AtomicU64::new(0),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn inc_hosts_inserted(&self) {
        self.hosts_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hosts_removed(&self) {
        self.hosts_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_succeeded(&self) {
        self.scans_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_samples_served(&self) {
        self.samples_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_snapshots_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
    }
}
