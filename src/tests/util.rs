//! Shared fixtures for the scenario tests.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::HostDbConfig;
use crate::filter::Resolver;
use crate::geoip::NullGeoIp;
use crate::hostdb::HostDb;
use crate::scan::{ProbeError, Prober};
use crate::types::{Currency, HostEntry, HostPublicKey, HostSettings, NetAddress};

/// Resolver that maps `10-0-x-y.test` style hostnames onto 10.0.x.y, so
/// fixtures can pick their subnets through the address alone.
pub struct EmbeddedIpResolver;

impl Resolver for EmbeddedIpResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let dotted = host.trim_end_matches(".test").replace('-', ".");
        dotted
            .parse::<IpAddr>()
            .map(|ip| vec![ip])
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
    }
}

/// Prober whose probes never complete; only its caller's deadline ends
/// them.
pub struct SilentProber;

#[async_trait]
impl Prober for SilentProber {
    async fn probe(&self, _addr: &NetAddress) -> Result<HostSettings, ProbeError> {
        std::future::pending().await
    }
}

pub fn key_of(id: u16) -> HostPublicKey {
    let mut key = [0u8; 32];
    key[0] = (id >> 8) as u8;
    key[1] = (id & 0xff) as u8;
    HostPublicKey::ed25519(key)
}

/// Entry with a distinct /24 per id and the given unit prices.
pub fn priced_entry(id: u16, storage: Currency, upload: Currency, download: Currency) -> HostEntry {
    let mut entry = HostEntry::new(
        key_of(id),
        NetAddress::new(format!("10-{}-{}-1.test:9982", id / 250 + 1, id % 250)),
        0,
    );
    entry.settings = HostSettings {
        accepting_contracts: true,
        storage_price: storage,
        upload_price: upload,
        download_price: download,
        contract_price: 1,
        ..Default::default()
    };
    entry
}

pub fn test_db(config: HostDbConfig) -> Arc<HostDb> {
    Arc::new(HostDb::new(
        config,
        Arc::new(EmbeddedIpResolver),
        Arc::new(NullGeoIp),
    ))
}
