//! Core types for the host database.
//!
//! A host is identified by its public key and announces a single network
//! address on the blockchain. Everything else we know about a host comes
//! from probing it: advertised settings, uptime bookkeeping, and the scan
//! history itself.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::SubnetPrefix;

/// Block height on the Cirrus chain.
pub type BlockHeight = u64;

/// Price or collateral amount in base currency units.
pub type Currency = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Helper module for serializing [u8; 32] arrays as hex strings
mod key_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("key must be 32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

/// Public key identifying a host, tagged with its signature algorithm.
///
/// The key is unique across the whole database: two hosts announcing the
/// same key are the same host, regardless of address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPublicKey {
    /// Signature algorithm tag (currently always "ed25519")
    pub algorithm: String,

    /// Raw 32-byte public key
    #[serde(with = "key_serde")]
    pub key: [u8; 32],
}

impl HostPublicKey {
    /// Create an ed25519-tagged host key.
    pub fn ed25519(key: [u8; 32]) -> Self {
        Self {
            algorithm: "ed25519".to_string(),
            key,
        }
    }

    /// Short hex form for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.key[..8])
    }
}

impl fmt::Display for HostPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(self.key))
    }
}

/// Announced `host:port` endpoint of a host.
///
/// Stored verbatim as announced; resolution to IP addresses happens through
/// the injected [`Resolver`](crate::filter::Resolver) capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetAddress(String);

impl NetAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hostname or IP literal, without port or IPv6 brackets.
    pub fn host(&self) -> &str {
        if let Some(rest) = self.0.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return &rest[..end];
            }
        }
        match self.0.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.0,
        }
    }

    /// The port, if one was announced.
    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }

    /// An address is usable if it carries a non-empty host and a port.
    pub fn is_valid(&self) -> bool {
        !self.host().is_empty() && self.port().is_some()
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the consensus change the database has processed up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusChangeId(#[serde(with = "key_serde")] pub [u8; 32]);

impl ConsensusChangeId {
    /// Cursor value requesting a replay from the first block.
    pub fn beginning() -> Self {
        Self([0u8; 32])
    }

    pub fn is_beginning(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Host announcement extracted from an accepted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAnnouncement {
    pub public_key: HostPublicKey,
    pub net_address: NetAddress,
}

/// Settings a host advertises when probed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Whether the host is currently taking new contracts
    pub accepting_contracts: bool,

    /// Longest contract duration the host accepts, in blocks
    pub max_duration: BlockHeight,

    /// Price per byte per block for stored data
    pub storage_price: Currency,

    /// Price per byte for uploads to the host
    pub upload_price: Currency,

    /// Price per byte for downloads from the host
    pub download_price: Currency,

    /// Flat fee for forming a contract
    pub contract_price: Currency,

    /// Collateral per byte per block the host is willing to lock up
    pub collateral: Currency,

    /// Host software version string
    pub version: String,
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub timestamp: Timestamp,
    pub success: bool,
}

/// Canonical per-host record.
///
/// Entries are value types: the database hands out clones and all mutation
/// goes back through [`HostDb::modify`](crate::hostdb::HostDb::modify) so
/// the weighted trees stay consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    pub public_key: HostPublicKey,
    pub net_address: NetAddress,

    /// Latest advertised settings snapshot
    pub settings: HostSettings,

    /// Block height at which the host was first announced
    pub first_seen: BlockHeight,

    /// Accumulated time the host was observed online
    pub historic_uptime: Duration,

    /// Accumulated time the host was observed offline
    pub historic_downtime: Duration,

    /// Most recent probe outcomes, oldest first, bounded in length
    pub scan_history: Vec<ScanRecord>,

    /// Contract interactions that completed successfully
    pub historic_successful_interactions: u64,

    /// Contract interactions that failed
    pub historic_failed_interactions: u64,

    /// When the host's subnet membership last changed
    pub last_ipnet_change: Timestamp,

    /// Canonical subnets of the host's resolved addresses
    pub ip_nets: Vec<SubnetPrefix>,

    /// Country of the host's resolved address, if geolocation knows it
    pub country: Option<String>,
}

impl HostEntry {
    /// Create a fresh entry for a host announced at `first_seen`.
    pub fn new(public_key: HostPublicKey, net_address: NetAddress, first_seen: BlockHeight) -> Self {
        Self {
            public_key,
            net_address,
            settings: HostSettings::default(),
            first_seen,
            historic_uptime: Duration::ZERO,
            historic_downtime: Duration::ZERO,
            scan_history: Vec::new(),
            historic_successful_interactions: 0,
            historic_failed_interactions: 0,
            last_ipnet_change: 0,
            ip_nets: Vec::new(),
            country: None,
        }
    }

    /// Whether the most recent probe of this host succeeded.
    pub fn last_scan_success(&self) -> bool {
        self.scan_history.last().map(|s| s.success).unwrap_or(false)
    }

    /// Number of recorded successful probes.
    pub fn successful_scans(&self) -> usize {
        self.scan_history.iter().filter(|s| s.success).count()
    }

    /// Fraction of observed time the host was online, in `[0, 1]`.
    ///
    /// A host with no observations yet is treated as fully up; penalties
    /// only start once there is data.
    pub fn uptime_ratio(&self) -> f64 {
        let up = self.historic_uptime.as_secs_f64();
        let down = self.historic_downtime.as_secs_f64();
        if up + down == 0.0 {
            return 1.0;
        }
        up / (up + down)
    }

    /// Blocks elapsed since the host was first seen.
    pub fn age_blocks(&self, height: BlockHeight) -> u64 {
        height.saturating_sub(self.first_seen)
    }

    /// Fold a probe outcome into the entry.
    ///
    /// The time elapsed since the previous probe is credited to uptime or
    /// downtime depending on the new outcome. On success the advertised
    /// settings snapshot is replaced. Scan timestamps are kept monotonically
    /// non-decreasing and the history is capped at `max_history` records.
    pub fn apply_scan_result(
        &mut self,
        timestamp: Timestamp,
        settings: Option<HostSettings>,
        max_history: usize,
    ) {
        let success = settings.is_some();
        let timestamp = match self.scan_history.last() {
            Some(last) => {
                let ts = timestamp.max(last.timestamp);
                let elapsed = Duration::from_secs(ts - last.timestamp);
                if success {
                    self.historic_uptime += elapsed;
                } else {
                    self.historic_downtime += elapsed;
                }
                ts
            }
            None => timestamp,
        };

        self.scan_history.push(ScanRecord { timestamp, success });
        if self.scan_history.len() > max_history {
            let excess = self.scan_history.len() - max_history;
            self.scan_history.drain(..excess);
        }

        if let Some(settings) = settings {
            self.settings = settings;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(id: u8) -> HostPublicKey {
        let mut key = [0u8; 32];
        key[0] = id;
        HostPublicKey::ed25519(key)
    }

    #[test]
    fn test_public_key_display_round_trip() {
        let key = test_key(7);
        let text = key.to_string();
        assert!(text.starts_with("ed25519:07"));

        let json = serde_json::to_string(&key).unwrap();
        let back: HostPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn test_net_address_parsing() {
        let addr = NetAddress::new("example.com:9982");
        assert_eq!(addr.host(), "example.com");
        assert_eq!(addr.port(), Some(9982));
        assert!(addr.is_valid());

        let v6 = NetAddress::new("[2001:db8::1]:9982");
        assert_eq!(v6.host(), "2001:db8::1");
        assert_eq!(v6.port(), Some(9982));

        let bare = NetAddress::new("example.com");
        assert_eq!(bare.port(), None);
        assert!(!bare.is_valid());
    }

    #[test]
    fn test_uptime_ratio_no_data() {
        let entry = HostEntry::new(test_key(1), NetAddress::new("a:1"), 0);
        assert_eq!(entry.uptime_ratio(), 1.0);
    }

    #[test]
    fn test_apply_scan_result_accumulates_time() {
        let mut entry = HostEntry::new(test_key(1), NetAddress::new("a:1"), 0);
        let settings = HostSettings {
            accepting_contracts: true,
            ..Default::default()
        };

        entry.apply_scan_result(1_000, Some(settings.clone()), 20);
        assert_eq!(entry.historic_uptime, Duration::ZERO);
        assert!(entry.last_scan_success());
        assert!(entry.settings.accepting_contracts);

        // 60 seconds later the host is still up.
        entry.apply_scan_result(1_060, Some(settings), 20);
        assert_eq!(entry.historic_uptime, Duration::from_secs(60));

        // 30 seconds later it is down; elapsed time goes to downtime.
        entry.apply_scan_result(1_090, None, 20);
        assert_eq!(entry.historic_downtime, Duration::from_secs(30));
        assert!(!entry.last_scan_success());
    }

    #[test]
    fn test_apply_scan_result_clamps_backwards_timestamps() {
        let mut entry = HostEntry::new(test_key(1), NetAddress::new("a:1"), 0);
        entry.apply_scan_result(1_000, None, 20);
        entry.apply_scan_result(500, None, 20);

        let stamps: Vec<_> = entry.scan_history.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 1_000]);
    }

    #[test]
    fn test_scan_history_is_bounded() {
        let mut entry = HostEntry::new(test_key(1), NetAddress::new("a:1"), 0);
        for i in 0..50 {
            entry.apply_scan_result(i * 10, None, 20);
        }
        assert_eq!(entry.scan_history.len(), 20);
        // Oldest records were dropped, newest kept.
        assert_eq!(entry.scan_history.last().unwrap().timestamp, 490);
    }
}
