//! The host database façade.
//!
//! Owns the canonical host map, the profile registry, and one weighted
//! tree per profile. Inserts, modifications, and removals fan out to every
//! tree so the key set stays identical across them; trees differ only in
//! the weights their profile assigns.
//!
//! Locking: the top-level locks (host map, tree map, profile registry)
//! are taken one at a time and released before any per-tree lock is
//! acquired. The only exception is profile lifecycle, which holds the
//! tree-map write lock while populating or dropping a tree; no other path
//! acquires the tree map while holding another top-level lock, so the
//! nesting cannot cycle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::HostDbConfig;
use crate::error::{Error, Result};
use crate::filter::{prefixes_of, IpFilter, Resolver};
use crate::geoip::GeoIp;
use crate::metrics::Metrics;
use crate::persist::{ProfileRecord, Snapshot};
use crate::profile::{Profile, ProfileRegistry, DEFAULT_PROFILE};
use crate::tree::WeightedTree;
use crate::types::{
    BlockHeight, ConsensusChangeId, Currency, HostAnnouncement, HostEntry, HostPublicKey,
};

/// Sample size used when estimating the going contract price.
const PRICE_SAMPLE_SIZE: usize = 32;

/// Database of known storage hosts with weighted random selection.
pub struct HostDb {
    config: HostDbConfig,
    resolver: Arc<dyn Resolver>,
    geoip: Arc<dyn GeoIp>,

    /// Canonical entry per public key; trees hold weight-annotated copies.
    hosts: RwLock<HashMap<HostPublicKey, HostEntry>>,

    /// One weighted tree per profile, keyed by profile name.
    trees: RwLock<BTreeMap<String, Arc<RwLock<WeightedTree>>>>,

    /// All selection profiles; the default profile always exists.
    profiles: RwLock<ProfileRegistry>,

    block_height: AtomicU64,
    last_change: Mutex<ConsensusChangeId>,

    /// One-way latch: flips to true once the initial scan finished.
    initial_scan_complete: AtomicBool,

    /// Set by mutations, cleared when a snapshot is taken.
    dirty: AtomicBool,

    pub metrics: Metrics,
}

impl HostDb {
    /// Create an empty database with only the default profile.
    pub fn new(
        config: HostDbConfig,
        resolver: Arc<dyn Resolver>,
        geoip: Arc<dyn GeoIp>,
    ) -> Self {
        let mut trees = BTreeMap::new();
        trees.insert(
            DEFAULT_PROFILE.to_string(),
            Arc::new(RwLock::new(WeightedTree::new())),
        );
        let allowed_locations = config.allowed_locations.clone();
        Self {
            config,
            resolver,
            geoip,
            hosts: RwLock::new(HashMap::new()),
            trees: RwLock::new(trees),
            profiles: RwLock::new(ProfileRegistry::new(allowed_locations)),
            block_height: AtomicU64::new(0),
            last_change: Mutex::new(ConsensusChangeId::beginning()),
            initial_scan_complete: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            metrics: Metrics::new(),
        }
    }

    pub fn config(&self) -> &HostDbConfig {
        &self.config
    }

    pub fn resolver(&self) -> Arc<dyn Resolver> {
        self.resolver.clone()
    }

    // === Host operations ===

    /// Insert a newly announced host into every tree.
    ///
    /// The insert is atomic across trees: a failure in any tree rolls the
    /// host back out of the trees already written and out of the canonical
    /// map.
    pub fn insert(&self, mut entry: HostEntry) -> Result<()> {
        if !entry.net_address.is_valid() {
            return Err(Error::invalid(format!(
                "announced address {} is not host:port",
                entry.net_address
            )));
        }
        self.refresh_network_info(&mut entry);

        {
            let mut hosts = self.hosts.write();
            if hosts.contains_key(&entry.public_key) {
                return Err(Error::duplicate(format!("host {}", entry.public_key)));
            }
            hosts.insert(entry.public_key.clone(), entry.clone());
        }

        let height = self.block_height();
        let mut written: Vec<Arc<RwLock<WeightedTree>>> = Vec::new();
        for (_, profile, tree) in self.tree_snapshot() {
            let weight = profile.weight_of(&entry, height);
            if let Err(err) = tree.write().insert(entry.clone(), weight) {
                for tree in &written {
                    let _ = tree.write().remove(&entry.public_key);
                }
                self.hosts.write().remove(&entry.public_key);
                return Err(err);
            }
            written.push(tree);
        }

        self.metrics.inc_hosts_inserted();
        self.mark_dirty();
        debug!("inserted host {} at {}", entry.public_key.short_hex(), entry.net_address);
        Ok(())
    }

    /// Replace an existing host's entry in every tree, recomputing its
    /// weight under each profile. All scan results are applied through
    /// here so tree sums stay consistent.
    pub fn modify(&self, entry: HostEntry) -> Result<()> {
        {
            let mut hosts = self.hosts.write();
            match hosts.get_mut(&entry.public_key) {
                Some(existing) => *existing = entry.clone(),
                None => {
                    return Err(Error::not_found(format!("host {}", entry.public_key)))
                }
            }
        }

        let height = self.block_height();
        for (_, profile, tree) in self.tree_snapshot() {
            let weight = profile.weight_of(&entry, height);
            tree.write().modify(entry.clone(), weight)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Remove a host from the database entirely.
    pub fn remove(&self, key: &HostPublicKey) -> Result<()> {
        if self.hosts.write().remove(key).is_none() {
            return Err(Error::not_found(format!("host {key}")));
        }
        for (_, _, tree) in self.tree_snapshot() {
            tree.write().remove(key)?;
        }
        self.metrics.inc_hosts_removed();
        self.mark_dirty();
        Ok(())
    }

    /// Look up a host by public key. Entries are identical across trees,
    /// so this reads the canonical map.
    pub fn host(&self, key: &HostPublicKey) -> Option<HostEntry> {
        self.hosts.read().get(key).cloned()
    }

    /// Copies of all known entries, in no particular order.
    pub fn hosts_snapshot(&self) -> Vec<HostEntry> {
        self.hosts.read().values().cloned().collect()
    }

    /// All hosts of a profile's tree, sorted by weight descending.
    pub fn all_hosts(&self, profile: &str) -> Result<Vec<HostEntry>> {
        Ok(self.tree_for(profile)?.read().all())
    }

    /// Hosts whose most recent probe succeeded and which take contracts.
    pub fn active_hosts(&self, profile: &str) -> Result<Vec<HostEntry>> {
        Ok(self
            .all_hosts(profile)?
            .into_iter()
            .filter(|e| e.last_scan_success() && e.settings.accepting_contracts)
            .collect())
    }

    /// Record the outcome of a contract interaction with a host.
    pub fn record_interaction(&self, key: &HostPublicKey, success: bool) -> Result<()> {
        let mut entry = self
            .host(key)
            .ok_or_else(|| Error::not_found(format!("host {key}")))?;
        if success {
            entry.historic_successful_interactions += 1;
        } else {
            entry.historic_failed_interactions += 1;
        }
        self.modify(entry)
    }

    // === Selection ===

    /// Draw up to `n` hosts from a profile's tree, weight-biased, without
    /// replacement and without subnet overlap.
    ///
    /// `blacklist` hosts are never returned. `address_blacklist` names
    /// hosts we already have contracts with: their subnets seed the IP
    /// filter so fresh picks cannot conflict with them.
    ///
    /// Fails with [`Error::InitialScanIncomplete`] until the scan
    /// coordinator has warmed up the database enough for weights to mean
    /// something.
    pub fn random_hosts(
        &self,
        profile: &str,
        n: usize,
        blacklist: &[HostPublicKey],
        address_blacklist: &[HostPublicKey],
    ) -> Result<Vec<HostEntry>> {
        if !self.initial_scan_complete() {
            return Err(Error::InitialScanIncomplete);
        }
        let tree = self.tree_for(profile)?;

        let mut filter = IpFilter::new(self.resolver.clone());
        {
            let hosts = self.hosts.read();
            for key in address_blacklist {
                if let Some(entry) = hosts.get(key) {
                    filter.add(&entry.net_address);
                }
            }
        }

        let exclude: HashSet<HostPublicKey> = blacklist
            .iter()
            .chain(address_blacklist.iter())
            .cloned()
            .collect();

        let picked = tree
            .read()
            .sample_without_replacement(n, &exclude, &mut filter);
        self.metrics.inc_samples_served();
        Ok(picked)
    }

    /// Mean contract price over a weighted sample of a profile's hosts.
    pub fn average_contract_price(&self, profile: &str) -> Result<Currency> {
        let tree = self.tree_for(profile)?;
        let mut filter = IpFilter::new(self.resolver.clone());
        let hosts = tree
            .read()
            .sample_without_replacement(PRICE_SAMPLE_SIZE, &HashSet::new(), &mut filter);
        if hosts.is_empty() {
            return Ok(0);
        }
        let total: Currency = hosts.iter().map(|h| h.settings.contract_price).sum();
        Ok(total / hosts.len() as Currency)
    }

    /// Given the hosts of the current contract set, return those violating
    /// the subnet-diversity rule.
    ///
    /// Entries are walked in ascending order of the time they have
    /// occupied their subnet, so on a conflict the younger entry loses.
    /// Hosts missing from the database are unconditionally violating.
    pub fn check_for_ip_violations(&self, keys: &[HostPublicKey]) -> Vec<HostPublicKey> {
        let mut violators = Vec::new();
        let mut entries = Vec::new();
        {
            let hosts = self.hosts.read();
            for key in keys {
                match hosts.get(key) {
                    Some(entry) => entries.push(entry.clone()),
                    None => violators.push(key.clone()),
                }
            }
        }

        entries.sort_by_key(|e| e.last_ipnet_change);

        let mut filter = IpFilter::new(self.resolver.clone());
        for entry in entries {
            if filter.filtered(&entry.net_address) {
                violators.push(entry.public_key);
            } else {
                filter.add(&entry.net_address);
            }
        }
        violators
    }

    // === Consensus ingestion ===

    /// Apply the announcements of an accepted block.
    ///
    /// Unknown keys become fresh entries first seen at `height`; known
    /// keys announcing a new address get their subnet bookkeeping
    /// refreshed. Returns the entries that should be (re-)scanned.
    pub fn process_consensus_change(
        &self,
        height: BlockHeight,
        change_id: ConsensusChangeId,
        announcements: &[HostAnnouncement],
    ) -> Vec<HostEntry> {
        self.block_height.store(height, Ordering::Release);
        *self.last_change.lock() = change_id;
        self.mark_dirty();

        let mut to_scan = Vec::new();
        for ann in announcements {
            if !ann.net_address.is_valid() {
                warn!(
                    "ignoring announcement from {} with malformed address {}",
                    ann.public_key.short_hex(),
                    ann.net_address
                );
                continue;
            }

            match self.host(&ann.public_key) {
                Some(mut entry) => {
                    if entry.net_address == ann.net_address {
                        continue;
                    }
                    entry.net_address = ann.net_address.clone();
                    self.refresh_network_info(&mut entry);
                    if let Err(err) = self.modify(entry.clone()) {
                        warn!("failed to apply re-announcement: {err}");
                        continue;
                    }
                    to_scan.push(entry);
                }
                None => {
                    let entry =
                        HostEntry::new(ann.public_key.clone(), ann.net_address.clone(), height);
                    match self.insert(entry) {
                        Ok(()) => {
                            if let Some(entry) = self.host(&ann.public_key) {
                                to_scan.push(entry);
                            }
                        }
                        Err(err) => warn!("failed to apply announcement: {err}"),
                    }
                }
            }
        }
        to_scan
    }

    pub fn block_height(&self) -> BlockHeight {
        self.block_height.load(Ordering::Acquire)
    }

    pub fn last_change(&self) -> ConsensusChangeId {
        *self.last_change.lock()
    }

    // === Profiles ===

    /// Create a selection profile and populate its tree by replaying the
    /// canonical host set.
    pub fn add_profile(&self, name: &str, storage_tier: &str) -> Result<()> {
        let profile = self.profiles.write().add(name, storage_tier)?;

        let height = self.block_height();
        let mut tree = WeightedTree::new();

        // Holding the tree-map write lock while replaying keeps the new
        // tree's key set consistent with concurrent host fan-out.
        let mut trees = self.trees.write();
        for entry in self.hosts.read().values() {
            let weight = profile.weight_of(entry, height);
            tree.insert(entry.clone(), weight)?;
        }
        trees.insert(name.to_string(), Arc::new(RwLock::new(tree)));
        drop(trees);

        self.mark_dirty();
        info!("added hostdb profile {name} ({storage_tier})");
        Ok(())
    }

    /// Change one setting of a profile and re-weight its tree.
    pub fn configure_profile(&self, name: &str, setting: &str, value: &str) -> Result<()> {
        let profile = self.profiles.write().configure(name, setting, value)?;
        let tree = self.tree_for(name)?;
        let height = self.block_height();

        // The new weight function invalidates every cached weight, so walk
        // the tree and reissue a modify per entry.
        let mut guard = tree.write();
        for entry in guard.all() {
            let weight = profile.weight_of(&entry, height);
            guard.modify(entry, weight)?;
        }
        drop(guard);

        self.mark_dirty();
        info!("reconfigured hostdb profile {name}: {setting} = {value}");
        Ok(())
    }

    /// Delete a profile and drop its tree. The default profile is
    /// protected.
    pub fn delete_profile(&self, name: &str) -> Result<()> {
        self.profiles.write().delete(name)?;
        self.trees.write().remove(name);
        self.mark_dirty();
        info!("deleted hostdb profile {name}");
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<Profile> {
        self.profiles.read().get(name).cloned()
    }

    /// All profiles, ordered by name.
    pub fn profiles(&self) -> Vec<Profile> {
        self.profiles.read().list()
    }

    // === Initial-scan latch ===

    /// Whether sampling is allowed yet.
    pub fn initial_scan_complete(&self) -> bool {
        self.initial_scan_complete.load(Ordering::Acquire)
    }

    /// Flip the latch. One-way: later calls are no-ops.
    pub fn mark_initial_scan_complete(&self) {
        if !self.initial_scan_complete.swap(true, Ordering::AcqRel) {
            info!("initial host scan complete, sampling enabled");
        }
    }

    // === Persistence hooks ===

    /// Whether state changed since the last snapshot was taken.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Snapshot of everything that persists across restarts.
    pub fn snapshot(&self) -> Snapshot {
        let profiles = self
            .profiles
            .read()
            .list()
            .into_iter()
            .map(|p| {
                (
                    p.name.clone(),
                    ProfileRecord {
                        storage_tier: p.storage_tier,
                        locations: p.locations.iter().cloned().collect(),
                    },
                )
            })
            .collect();
        Snapshot::new(
            profiles,
            self.hosts_snapshot(),
            self.block_height(),
            self.last_change(),
        )
    }

    /// Rebuild state from a loaded snapshot. Meant to run during startup,
    /// before the scan coordinator is spawned.
    pub fn restore(&self, snapshot: Snapshot) -> Result<()> {
        snapshot.check_metadata()?;

        let height = snapshot.body.block_height;
        self.block_height.store(height, Ordering::Release);
        // A zero height means the previous run never tracked consensus
        // properly; reset the cursor so the indexer replays from the
        // start and re-derives anything dropped in the past.
        *self.last_change.lock() = if height == 0 {
            ConsensusChangeId::beginning()
        } else {
            snapshot.body.last_change
        };

        let profiles: Vec<Profile> = snapshot
            .body
            .profiles
            .iter()
            .map(|(name, record)| Profile {
                name: name.clone(),
                storage_tier: record.storage_tier,
                locations: record.locations.iter().cloned().collect(),
            })
            .collect();
        self.profiles.write().replace_all(profiles);

        let mut hosts = HashMap::new();
        for mut entry in snapshot.body.hosts {
            // First-seen heights recorded ahead of the chain tip would
            // make ages underflow; clamp them back.
            if entry.first_seen > height {
                entry.first_seen = height;
            }
            hosts.insert(entry.public_key.clone(), entry);
        }

        let mut trees = BTreeMap::new();
        for profile in self.profiles.read().list() {
            let mut tree = WeightedTree::new();
            for entry in hosts.values() {
                let weight = profile.weight_of(entry, height);
                tree.insert(entry.clone(), weight)?;
            }
            trees.insert(profile.name.clone(), Arc::new(RwLock::new(tree)));
        }

        *self.hosts.write() = hosts;
        *self.trees.write() = trees;
        Ok(())
    }

    // === Internals ===

    fn tree_for(&self, profile: &str) -> Result<Arc<RwLock<WeightedTree>>> {
        self.trees
            .read()
            .get(profile)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("profile {profile}")))
    }

    /// Snapshot the (name, profile, tree) triples without holding the
    /// tree-map lock across tree operations.
    fn tree_snapshot(&self) -> Vec<(String, Profile, Arc<RwLock<WeightedTree>>)> {
        let trees: Vec<(String, Arc<RwLock<WeightedTree>>)> = self
            .trees
            .read()
            .iter()
            .map(|(name, tree)| (name.clone(), tree.clone()))
            .collect();
        let profiles = self.profiles.read();
        trees
            .into_iter()
            .filter_map(|(name, tree)| {
                profiles.get(&name).cloned().map(|p| (name, p, tree))
            })
            .collect()
    }

    /// Re-resolve a host's addresses, refreshing its subnet set, the
    /// subnet-change timestamp, and its country.
    fn refresh_network_info(&self, entry: &mut HostEntry) {
        let ips = self
            .resolver
            .resolve(entry.net_address.host())
            .unwrap_or_default();
        let prefixes = prefixes_of(&ips);
        if prefixes != entry.ip_nets {
            entry.ip_nets = prefixes;
            entry.last_ipnet_change = current_timestamp();
        }
        entry.country = ips.first().and_then(|&ip| self.geoip.country(ip));
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
