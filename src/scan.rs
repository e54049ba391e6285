//! Scan Coordinator
//!
//! Drives continuous probing of hosts so their scan histories, prices,
//! and liveness stay current. A bounded pool of workers drains a FIFO
//! queue of probe requests; a pending-set suppresses duplicates. The
//! producer side is a periodic sweep that re-queues every host whose last
//! probe is older than its cadence: hosts we know little about (or that
//! just failed) are probed every few minutes, established hosts hourly.
//!
//! The coordinator also owns the initial-scan latch: sampling stays
//! disabled until every host known at startup has been probed at least
//! twice, or a timeout elapses, whichever comes first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hostdb::HostDb;
use crate::types::{HostEntry, HostPublicKey, HostSettings, NetAddress, Timestamp};

/// Why a probe failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("malformed host response: {0}")]
    Protocol(String),
}

/// Network probing capability.
///
/// Injected so the coordinator never opens connections itself; tests plug
/// in deterministic stubs and the production client supplies the real
/// settings handshake.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Fetch the host's current external settings.
    async fn probe(&self, addr: &NetAddress) -> Result<HostSettings, ProbeError>;
}

/// Queue and worker pool that keeps host records fresh.
pub struct ScanCoordinator {
    db: Arc<HostDb>,
    prober: Arc<dyn Prober>,

    /// Sender side of the probe queue; dropped on shutdown to drain the
    /// workers.
    tx: Mutex<Option<UnboundedSender<HostEntry>>>,
    rx: tokio::sync::Mutex<UnboundedReceiver<HostEntry>>,

    /// Hosts currently queued or being probed.
    pending: Mutex<HashSet<HostPublicKey>>,

    /// Hosts known at startup that still need their second probe.
    initial_targets: Mutex<HashSet<HostPublicKey>>,

    shutdown: AtomicBool,
    shutdown_notify: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScanCoordinator {
    /// Create a coordinator for `db`. Hosts that have not yet been probed
    /// twice become the initial-scan targets; with nothing to probe the
    /// latch flips immediately.
    pub fn new(db: Arc<HostDb>, prober: Arc<dyn Prober>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let initial_targets: HashSet<HostPublicKey> = db
            .hosts_snapshot()
            .iter()
            .filter(|entry| entry.scan_history.len() < 2)
            .map(|entry| entry.public_key.clone())
            .collect();
        if initial_targets.is_empty() {
            db.mark_initial_scan_complete();
        }

        Arc::new(Self {
            db,
            prober,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashSet::new()),
            initial_targets: Mutex::new(initial_targets),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker pool, the periodic sweep, and the latch timer,
    /// and queue a first probe for every host that needs one.
    pub fn start(self: &Arc<Self>) {
        let workers = self.db.config().scan_workers;
        info!("scan coordinator starting with {workers} workers");

        let mut handles = Vec::new();
        for worker_id in 0..workers {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.worker_loop(worker_id).await }));
        }

        let this = self.clone();
        handles.push(tokio::spawn(async move { this.sweep_loop().await }));

        let this = self.clone();
        handles.push(tokio::spawn(async move { this.latch_timer().await }));

        self.handles.lock().extend(handles);

        // Hosts reloaded with a thin scan history get probed right away.
        for entry in self.db.hosts_snapshot() {
            if entry.scan_history.len() < 2 {
                self.enqueue(entry);
            }
        }
    }

    /// Queue a probe for a host unless one is already queued or running.
    pub fn enqueue(&self, entry: HostEntry) {
        if !self.pending.lock().insert(entry.public_key.clone()) {
            return;
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(entry);
        }
    }

    /// Signal shutdown and wait for in-flight probes to finish. Probes
    /// honour their own deadline, so this returns promptly.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.tx.lock().take(); // closes the queue, draining the workers
        self.shutdown_notify.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("scan coordinator stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("scan worker {worker_id} started");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let entry = {
                let mut rx = self.rx.lock().await;
                match rx.recv().await {
                    Some(entry) => entry,
                    None => break,
                }
            };
            self.scan_host(entry).await;
        }
        debug!("scan worker {worker_id} stopped");
    }

    /// Probe a single host and fold the outcome into the database.
    async fn scan_host(&self, entry: HostEntry) {
        let timeout = self.db.config().probe_timeout();
        let outcome = tokio::time::timeout(timeout, self.prober.probe(&entry.net_address)).await;

        let settings = match outcome {
            Ok(Ok(settings)) => {
                self.db.metrics.inc_scans_succeeded();
                Some(settings)
            }
            Ok(Err(err)) => {
                debug!("probe of {} failed: {err}", entry.net_address);
                self.db.metrics.inc_scans_failed();
                None
            }
            Err(_) => {
                debug!("probe of {} timed out", entry.net_address);
                self.db.metrics.inc_scans_failed();
                None
            }
        };

        // Work on the freshest copy; the entry may have changed while the
        // probe sat in the queue.
        if let Some(mut current) = self.db.host(&entry.public_key) {
            current.apply_scan_result(
                current_timestamp(),
                settings,
                self.db.config().max_scan_history,
            );
            if let Err(err) = self.db.modify(current.clone()) {
                warn!("failed to record scan of {}: {err}", entry.public_key.short_hex());
            }
            self.note_initial_progress(&current);
        }

        self.pending.lock().remove(&entry.public_key);
    }

    /// Track progress toward the initial-scan latch.
    fn note_initial_progress(&self, entry: &HostEntry) {
        let mut targets = self.initial_targets.lock();
        if targets.is_empty() {
            return;
        }
        if entry.scan_history.len() >= 2 {
            targets.remove(&entry.public_key);
        }
        if targets.is_empty() {
            drop(targets);
            self.db.mark_initial_scan_complete();
        }
    }

    /// Periodically queue every host whose probe is overdue.
    async fn sweep_loop(self: Arc<Self>) {
        let sweep_interval =
            std::time::Duration::from_secs(self.db.config().scan_sweep_interval_secs);
        let mut interval = tokio::time::interval(sweep_interval);

        let notified = self.shutdown_notify.notified();
        tokio::pin!(notified);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut notified => break,
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = current_timestamp();
            for entry in self.db.hosts_snapshot() {
                if self.scan_due(&entry, now) {
                    self.enqueue(entry);
                }
            }
        }
    }

    /// Whether a host's last probe is older than its cadence.
    fn scan_due(&self, entry: &HostEntry, now: Timestamp) -> bool {
        let config = self.db.config();
        let last = match entry.scan_history.last() {
            Some(record) => record.timestamp,
            None => return true,
        };
        let established = entry.successful_scans() >= config.established_scan_count
            && entry.last_scan_success();
        let cadence = if established {
            config.established_scan_interval_secs
        } else {
            config.active_scan_interval_secs
        };
        now.saturating_sub(last) >= cadence
    }

    /// Flip the latch after the configured timeout even if some startup
    /// hosts never produced two probe results.
    async fn latch_timer(self: Arc<Self>) {
        let timeout = self.db.config().initial_scan_timeout();

        let notified = self.shutdown_notify.notified();
        tokio::pin!(notified);

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                if !self.db.initial_scan_complete() {
                    info!(
                        "initial scan timed out after {}s, enabling sampling anyway",
                        timeout.as_secs()
                    );
                    self.db.mark_initial_scan_complete();
                }
            }
            _ = &mut notified => {}
        }
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
