//! Geolocation capability.
//!
//! Host countries feed the per-profile location restriction. The lookup is
//! injected as a capability object so production code can sit on top of a
//! memory-mapped country database while tests use fixed tables.

use std::net::IpAddr;

/// IP-to-country lookup. Implementations must be safe for concurrent
/// lock-free reads.
pub trait GeoIp: Send + Sync {
    /// Two-letter lowercase country code of `ip`, if known.
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Geolocation stub that knows nothing. Hosts keep an unknown country and
/// only match profiles without location restrictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGeoIp;

impl GeoIp for NullGeoIp {
    fn country(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// Table-backed lookup over CIDR ranges, longest prefix wins.
#[derive(Debug, Default)]
pub struct TableGeoIp {
    ranges: Vec<(IpAddr, u8, String)>,
}

impl TableGeoIp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network range and its country code.
    pub fn insert(&mut self, network: IpAddr, prefix_len: u8, country: &str) {
        self.ranges
            .push((network, prefix_len, country.to_lowercase()));
    }

    pub fn with_range(mut self, network: &str, prefix_len: u8, country: &str) -> Self {
        if let Ok(network) = network.parse() {
            self.insert(network, prefix_len, country);
        }
        self
    }
}

impl GeoIp for TableGeoIp {
    fn country(&self, ip: IpAddr) -> Option<String> {
        self.ranges
            .iter()
            .filter(|(network, prefix_len, _)| range_contains(*network, *prefix_len, ip))
            .max_by_key(|(_, prefix_len, _)| *prefix_len)
            .map(|(_, _, country)| country.clone())
    }
}

fn range_contains(network: IpAddr, prefix_len: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(network), IpAddr::V4(ip)) => {
            if prefix_len == 0 {
                return true;
            }
            let prefix_len = prefix_len.min(32) as u32;
            (u32::from(network) ^ u32::from(ip)) >> (32 - prefix_len) == 0
        }
        (IpAddr::V6(network), IpAddr::V6(ip)) => {
            if prefix_len == 0 {
                return true;
            }
            let prefix_len = prefix_len.min(128) as u32;
            (u128::from(network) ^ u128::from(ip)) >> (128 - prefix_len) == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_geoip_knows_nothing() {
        assert_eq!(NullGeoIp.country("203.0.113.1".parse().unwrap()), None);
    }

    #[test]
    fn test_table_lookup() {
        let geoip = TableGeoIp::new()
            .with_range("10.0.0.0", 8, "de")
            .with_range("192.168.0.0", 16, "us");

        assert_eq!(
            geoip.country("10.9.8.7".parse().unwrap()),
            Some("de".to_string())
        );
        assert_eq!(
            geoip.country("192.168.1.1".parse().unwrap()),
            Some("us".to_string())
        );
        assert_eq!(geoip.country("172.16.0.1".parse().unwrap()), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let geoip = TableGeoIp::new()
            .with_range("10.0.0.0", 8, "de")
            .with_range("10.1.0.0", 16, "fr");

        assert_eq!(
            geoip.country("10.1.2.3".parse().unwrap()),
            Some("fr".to_string())
        );
        assert_eq!(
            geoip.country("10.2.0.1".parse().unwrap()),
            Some("de".to_string())
        );
    }

    #[test]
    fn test_ipv6_ranges() {
        let geoip = TableGeoIp::new().with_range("2001:db8::", 32, "jp");
        assert_eq!(
            geoip.country("2001:db8:1::1".parse().unwrap()),
            Some("jp".to_string())
        );
        assert_eq!(geoip.country("2001:db9::1".parse().unwrap()), None);
        // An IPv4 address never matches an IPv6 range.
        assert_eq!(geoip.country("10.0.0.1".parse().unwrap()), None);
    }
}
