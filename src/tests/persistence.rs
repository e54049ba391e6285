//! Snapshot round trips through the real file format.

use tempfile::tempdir;

use crate::config::HostDbConfig;
use crate::persist::Persister;
use crate::profile::settings;
use crate::types::{ConsensusChangeId, HostEntry};

use super::util::{priced_entry, test_db};

fn sorted_by_key(mut hosts: Vec<HostEntry>) -> Vec<HostEntry> {
    hosts.sort_by(|a, b| a.public_key.cmp(&b.public_key));
    hosts
}

/// Save then load yields a database indistinguishable by host listing
/// and profile listing.
#[test]
fn test_round_trip_preserves_hosts_and_profiles() {
    let dir = tempdir().unwrap();
    let persister = Persister::in_dir(dir.path());

    let original = test_db(HostDbConfig::default());
    original.process_consensus_change(500, ConsensusChangeId([9u8; 32]), &[]);
    original.add_profile("archive", "cold").unwrap();
    original
        .configure_profile("archive", settings::ADD_LOCATION, "de")
        .unwrap();

    for id in 1..=10 {
        let mut entry = priced_entry(id, id as u128, 2, 3);
        entry.apply_scan_result(1_000 + id as u64, Some(entry.settings.clone()), 20);
        original.insert(entry).unwrap();
    }

    persister.save(&original.snapshot()).unwrap();

    let restored = test_db(HostDbConfig::default());
    let snapshot = persister.load().unwrap().expect("snapshot should exist");
    restored.restore(snapshot).unwrap();

    assert_eq!(restored.block_height(), 500);
    assert_eq!(restored.last_change(), ConsensusChangeId([9u8; 32]));
    assert_eq!(restored.profiles(), original.profiles());

    for profile in ["default", "archive"] {
        let want = sorted_by_key(original.all_hosts(profile).unwrap());
        let got = sorted_by_key(restored.all_hosts(profile).unwrap());
        assert_eq!(want, got, "host set differs in tree {profile}");
    }
}

/// A snapshot from a run that never tracked consensus resets the cursor
/// so the indexer replays from the first block.
#[test]
fn test_zero_height_snapshot_resets_cursor() {
    let dir = tempdir().unwrap();
    let persister = Persister::in_dir(dir.path());

    let original = test_db(HostDbConfig::default());
    // Height stays zero, but a stale cursor is recorded anyway.
    let mut snapshot = original.snapshot();
    snapshot.body.last_change = ConsensusChangeId([3u8; 32]);
    persister.save(&snapshot).unwrap();

    let restored = test_db(HostDbConfig::default());
    restored.restore(persister.load().unwrap().unwrap()).unwrap();
    assert!(restored.last_change().is_beginning());
}

/// First-seen heights ahead of the recorded chain tip are clamped on
/// load so host ages cannot underflow.
#[test]
fn test_restore_clamps_future_first_seen() {
    let original = test_db(HostDbConfig::default());
    original.process_consensus_change(100, ConsensusChangeId([1u8; 32]), &[]);

    let mut entry = priced_entry(1, 1, 1, 1);
    entry.first_seen = 9_000;
    original.insert(entry).unwrap();

    let restored = test_db(HostDbConfig::default());
    restored.restore(original.snapshot()).unwrap();

    let host = restored.all_hosts("default").unwrap().remove(0);
    assert_eq!(host.first_seen, 100);
}
