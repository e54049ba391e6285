//! Snapshot persistence.
//!
//! The whole database persists as a single JSON snapshot: profiles, host
//! entries, and the consensus cursor. Writes go to a temp file, are
//! fsynced, and renamed into place so a crash can never leave a torn
//! snapshot behind. A missing file is an empty database; a present but
//! unreadable file is fatal at startup.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hostdb::HostDb;
use crate::profile::StorageTier;
use crate::types::{BlockHeight, ConsensusChangeId, HostEntry};

/// Header tag of the snapshot file.
pub const PERSIST_HEADER: &str = "HostDB Persistence";

/// Version of the snapshot schema.
pub const PERSIST_VERSION: &str = "0.5";

/// Default file name of the snapshot inside a data directory.
pub const PERSIST_FILENAME: &str = "hostdb.json";

/// Metadata tagging a snapshot file with schema and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub header: String,
    pub version: String,
}

/// Persisted form of a profile, keyed by name in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub storage_tier: StorageTier,
    pub locations: Vec<String>,
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub profiles: BTreeMap<String, ProfileRecord>,
    pub hosts: Vec<HostEntry>,
    pub block_height: BlockHeight,
    pub last_change: ConsensusChangeId,
}

/// A complete snapshot record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub body: SnapshotBody,
}

impl Snapshot {
    pub fn new(
        profiles: BTreeMap<String, ProfileRecord>,
        hosts: Vec<HostEntry>,
        block_height: BlockHeight,
        last_change: ConsensusChangeId,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                header: PERSIST_HEADER.to_string(),
                version: PERSIST_VERSION.to_string(),
            },
            body: SnapshotBody {
                profiles,
                hosts,
                block_height,
                last_change,
            },
        }
    }

    /// Reject snapshots written by something other than us, or by a
    /// schema we do not understand.
    pub fn check_metadata(&self) -> Result<()> {
        if self.metadata.header != PERSIST_HEADER {
            return Err(Error::Persistence(format!(
                "unrecognized snapshot header {:?}",
                self.metadata.header
            )));
        }
        if self.metadata.version != PERSIST_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported snapshot version {:?}",
                self.metadata.version
            )));
        }
        Ok(())
    }
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct Persister {
    path: PathBuf,
}

impl Persister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persister for the conventional file inside a data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PERSIST_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot atomically: temp file, fsync, rename.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, &self.path)?;

        debug!("saved hostdb snapshot to {:?}", self.path);
        Ok(())
    }

    /// Load the snapshot, `None` if the file does not exist yet.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&content)?;
        snapshot.check_metadata()?;
        Ok(Some(snapshot))
    }
}

/// Periodically flush the database to disk until shutdown.
///
/// Ticks every `flush_interval`; a tick writes only when state actually
/// changed. Failed writes are logged and retried on the next tick. The
/// final flush on shutdown is unconditional and its error is surfaced to
/// the caller.
pub async fn run_flush_loop(
    db: Arc<HostDb>,
    persister: Persister,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let flush_interval = Duration::from_secs(db.config().flush_interval_secs);
    info!(
        "hostdb flush loop started (every {}s, file {:?})",
        flush_interval.as_secs(),
        persister.path()
    );

    let mut interval = tokio::time::interval(flush_interval);
    interval.tick().await; // the first tick fires immediately

    let notified = shutdown.notified();
    tokio::pin!(notified);

    let mut retry_pending = false;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if db.take_dirty() || retry_pending {
                    match persister.save(&db.snapshot()) {
                        Ok(()) => {
                            retry_pending = false;
                            db.metrics.inc_snapshots_written();
                        }
                        Err(err) => {
                            warn!("periodic hostdb flush failed, will retry: {err}");
                            retry_pending = true;
                        }
                    }
                }
            }
            _ = &mut notified => break,
        }
    }

    // Unconditional flush on the way out; this one's failure matters.
    persister.save(&db.snapshot())?;
    db.metrics.inc_snapshots_written();
    info!("hostdb flushed on shutdown");
    Ok(())
}
