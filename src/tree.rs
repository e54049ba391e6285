//! Weighted host tree.
//!
//! A balanced binary tree whose leaves carry host entries and whose
//! internal nodes cache the weight sum of their subtree. This gives
//! O(log n) insertion, update, and removal, and O(log n) weight-biased
//! random draws: pick `r` uniformly in `[0, root_sum)` and descend, going
//! left when `r` falls below the left child's sum and subtracting it
//! otherwise.
//!
//! Removal is logical: the leaf is tombstoned and its weight contribution
//! zeroed, and the tree is compacted once more than half of the leaves are
//! tombstones. Sampling tolerates zero-weight leaves trivially, so
//! rebuilds can be amortized instead of rebalancing on every removal.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::error::{Error, Result};
use crate::filter::IpFilter;
use crate::types::{HostEntry, HostPublicKey};

struct Leaf {
    entry: HostEntry,
    weight: f64,
    deleted: bool,
}

/// Binary tree of hosts supporting weighted random selection.
///
/// The tree is laid out as an implicit heap: `sums[1]` is the root,
/// `sums[2n]` and `sums[2n + 1]` are the children of `sums[n]`, and leaf
/// slot `i` lives at `sums[cap + i]`. Parents always hold exactly the sum
/// of their children, so the root equals the pairwise sum of all leaf
/// weights.
pub struct WeightedTree {
    leaves: Vec<Leaf>,
    slots: HashMap<HostPublicKey, usize>,
    sums: Vec<f64>,
    cap: usize,
    deleted: usize,
}

impl Default for WeightedTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightedTree {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            slots: HashMap::new(),
            sums: vec![0.0; 2],
            cap: 1,
            deleted: 0,
        }
    }

    /// Number of live hosts in the tree.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cached sum of all leaf weights.
    pub fn total_weight(&self) -> f64 {
        self.sums[1]
    }

    /// Current weight of a host, if it is in the tree.
    pub fn weight(&self, key: &HostPublicKey) -> Option<f64> {
        self.slots.get(key).map(|&slot| self.leaves[slot].weight)
    }

    /// Insert a host with the given weight. Inserting an existing public
    /// key is an error, never a silent overwrite.
    pub fn insert(&mut self, entry: HostEntry, weight: f64) -> Result<()> {
        debug_assert!(weight.is_finite() && weight >= 0.0);
        if self.slots.contains_key(&entry.public_key) {
            return Err(Error::duplicate(format!("host {}", entry.public_key)));
        }

        let slot = self.leaves.len();
        self.slots.insert(entry.public_key.clone(), slot);
        self.leaves.push(Leaf {
            entry,
            weight,
            deleted: false,
        });

        if self.leaves.len() > self.cap {
            self.rebuild_sums();
        } else {
            self.set_leaf_sum(slot, weight);
        }
        Ok(())
    }

    /// Replace a host's entry and weight. This is the only place weights
    /// change, so all scan-result writes must come through here.
    pub fn modify(&mut self, entry: HostEntry, weight: f64) -> Result<()> {
        debug_assert!(weight.is_finite() && weight >= 0.0);
        let &slot = self
            .slots
            .get(&entry.public_key)
            .ok_or_else(|| Error::not_found(format!("host {}", entry.public_key)))?;

        let leaf = &mut self.leaves[slot];
        leaf.entry = entry;
        leaf.weight = weight;
        self.set_leaf_sum(slot, weight);
        Ok(())
    }

    /// Remove a host. The leaf is tombstoned; the tree compacts itself
    /// once tombstones outnumber live leaves.
    pub fn remove(&mut self, key: &HostPublicKey) -> Result<()> {
        let slot = self
            .slots
            .remove(key)
            .ok_or_else(|| Error::not_found(format!("host {key}")))?;

        self.leaves[slot].deleted = true;
        self.set_leaf_sum(slot, 0.0);
        self.deleted += 1;

        if self.deleted * 2 > self.leaves.len() {
            self.compact();
        }
        Ok(())
    }

    /// Look up a host by public key.
    pub fn select(&self, key: &HostPublicKey) -> Option<&HostEntry> {
        self.slots.get(key).map(|&slot| &self.leaves[slot].entry)
    }

    /// All live hosts, sorted by weight descending. Zero-weight hosts are
    /// included; they are only invisible to sampling.
    pub fn all(&self) -> Vec<HostEntry> {
        let mut hosts: Vec<(f64, &HostEntry)> = self
            .leaves
            .iter()
            .filter(|leaf| !leaf.deleted)
            .map(|leaf| (leaf.weight, &leaf.entry))
            .collect();
        hosts.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        hosts.into_iter().map(|(_, entry)| entry.clone()).collect()
    }

    /// Draw up to `n` hosts, weight-biased, without replacement.
    ///
    /// Hosts in `exclude` are skipped, as is any host whose subnets
    /// collide with the filter's already-admitted set; each returned host
    /// is admitted into the filter before the next draw. May return fewer
    /// than `n` hosts; stops early once no selectable weight remains.
    ///
    /// The draw works on a scratch copy of the sum array, zeroing chosen
    /// and rejected leaves there, so concurrent readers are unaffected and
    /// nothing needs restoring afterwards.
    pub fn sample_without_replacement(
        &self,
        n: usize,
        exclude: &HashSet<HostPublicKey>,
        filter: &mut IpFilter,
    ) -> Vec<HostEntry> {
        let mut sums = self.sums.clone();
        for key in exclude {
            if let Some(&slot) = self.slots.get(key) {
                zero_slot(&mut sums, self.cap, slot);
            }
        }

        let mut rng = rand::thread_rng();
        let mut picked = Vec::new();
        while picked.len() < n {
            let total = sums[1];
            if !(total > 0.0) || !total.is_finite() {
                break;
            }

            let r = rng.gen_range(0.0..total);
            let slot = descend(&sums, self.cap, r);
            if !zero_slot(&mut sums, self.cap, slot) {
                // Floating-point residue led to an already-spent slot;
                // there is no real weight left.
                break;
            }

            let leaf = &self.leaves[slot];
            if leaf.deleted || leaf.weight <= 0.0 {
                continue;
            }
            if filter.filtered(&leaf.entry.net_address) {
                continue;
            }
            filter.add(&leaf.entry.net_address);
            picked.push(leaf.entry.clone());
        }
        picked
    }

    /// Drop tombstones and rebuild the index and sum array.
    fn compact(&mut self) {
        self.leaves.retain(|leaf| !leaf.deleted);
        self.deleted = 0;
        self.slots = self
            .leaves
            .iter()
            .enumerate()
            .map(|(slot, leaf)| (leaf.entry.public_key.clone(), slot))
            .collect();
        self.rebuild_sums();
    }

    /// Recompute the whole sum array, growing capacity to fit the leaves.
    fn rebuild_sums(&mut self) {
        self.cap = self.leaves.len().next_power_of_two().max(1);
        self.sums = vec![0.0; 2 * self.cap];
        for (slot, leaf) in self.leaves.iter().enumerate() {
            if !leaf.deleted {
                self.sums[self.cap + slot] = leaf.weight;
            }
        }
        for node in (1..self.cap).rev() {
            self.sums[node] = self.sums[2 * node] + self.sums[2 * node + 1];
        }
    }

    /// Set one leaf's contribution and refresh the path to the root.
    /// Parents are recomputed as the exact sum of their children rather
    /// than adjusted by a delta, so rounding error cannot accumulate
    /// across updates.
    fn set_leaf_sum(&mut self, slot: usize, value: f64) {
        let mut node = self.cap + slot;
        self.sums[node] = value;
        node /= 2;
        while node >= 1 {
            self.sums[node] = self.sums[2 * node] + self.sums[2 * node + 1];
            node /= 2;
        }
    }
}

/// Walk from the root to the leaf slot owning point `r` of the weight mass.
fn descend(sums: &[f64], cap: usize, mut r: f64) -> usize {
    let mut node = 1;
    while node < cap {
        let left = 2 * node;
        if r < sums[left] {
            node = left;
        } else {
            r -= sums[left];
            node = left + 1;
        }
    }
    node - cap
}

/// Zero a leaf's contribution in a scratch sum array. Returns false if the
/// slot already had no weight.
fn zero_slot(sums: &mut [f64], cap: usize, slot: usize) -> bool {
    let mut node = cap + slot;
    if sums[node] == 0.0 {
        return false;
    }
    sums[node] = 0.0;
    node /= 2;
    while node >= 1 {
        sums[node] = sums[2 * node] + sums[2 * node + 1];
        node /= 2;
    }
    true
}
