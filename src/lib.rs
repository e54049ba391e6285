//! Cirrus host database
//!
//! The host-selection core of the Cirrus storage client. A blockchain
//! indexer feeds host announcements in; the database keeps a weighted
//! view of every known host per selection profile and hands out random,
//! subnet-diverse subsets for contract formation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       CIRRUS HOSTDB                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  HostDb (façade)      ←── announcements from the indexer     │
//! │  WeightedTree × N     ←── one per profile, weight-biased     │
//! │  ProfileRegistry      ←── storage tier + location policies   │
//! │  IpFilter             ←── subnet diversity during sampling   │
//! │  ScanCoordinator      ←── worker pool probing host liveness  │
//! │  Persister            ←── atomic JSON snapshots, 2m flush    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The synchronous core (trees, registry, filter) is wrapped by async
//! service loops on tokio: the scan coordinator and the snapshot flush
//! loop. Network probing, DNS resolution, and geolocation are injected
//! capabilities, so the core itself never performs I/O.

pub mod config;
pub mod error;
pub mod filter;
pub mod geoip;
pub mod hostdb;
pub mod metrics;
pub mod persist;
pub mod profile;
pub mod scan;
pub mod tree;
pub mod types;
mod weight;

#[cfg(test)]
mod tests;

pub use config::HostDbConfig;
pub use error::{Error, Result};
pub use filter::{IpFilter, Resolver, SubnetPrefix, SystemResolver};
pub use geoip::{GeoIp, NullGeoIp, TableGeoIp};
pub use hostdb::HostDb;
pub use persist::{Persister, Snapshot};
pub use profile::{Profile, ProfileRegistry, StorageTier, DEFAULT_PROFILE};
pub use scan::{ProbeError, Prober, ScanCoordinator};
pub use tree::WeightedTree;
pub use types::{
    BlockHeight, ConsensusChangeId, Currency, HostAnnouncement, HostEntry, HostPublicKey,
    HostSettings, ScanRecord, Timestamp,
};
pub use weight::{AGE_RAMP_BLOCKS, ZERO_PRICE_SUBSTITUTE};
