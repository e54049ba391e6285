//! Subnet extraction and the IP-diversity filter.
//!
//! Contracts must not cluster inside a single network range, so sampling
//! rejects any candidate whose subnet overlaps a host that was already
//! picked. An address may resolve to several IPs (IPv4 and IPv6); the
//! filter tracks the full prefix set and rejects on any overlap.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::NetAddress;

/// IPv4 addresses are grouped by their /24.
pub const IPV4_PREFIX_BITS: u8 = 24;

/// IPv6 addresses are grouped by their /54.
pub const IPV6_PREFIX_BITS: u8 = 54;

/// Canonical subnet of a resolved address, e.g. `"203.0.113.0/24"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubnetPrefix(String);

impl SubnetPrefix {
    /// Canonical prefix of a single IP address.
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                let masked = Ipv4Addr::new(o[0], o[1], o[2], 0);
                Self(format!("{}/{}", masked, IPV4_PREFIX_BITS))
            }
            IpAddr::V6(v6) => {
                let mut s = v6.segments();
                // 54 bits: three full groups plus the top six bits of the fourth.
                s[3] &= 0xfc00;
                for seg in s.iter_mut().skip(4) {
                    *seg = 0;
                }
                let masked = Ipv6Addr::new(s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]);
                Self(format!("{}/{}", masked, IPV6_PREFIX_BITS))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DNS resolution capability.
///
/// Injected rather than called directly so tests can substitute
/// deterministic lookups and so the sampling path stays free of hidden
/// network dependencies.
pub trait Resolver: Send + Sync {
    /// Resolve a hostname or IP literal to its addresses.
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = (host, 0u16).to_socket_addrs()?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Canonical deduplicated subnets of a set of resolved addresses.
pub fn prefixes_of(ips: &[IpAddr]) -> Vec<SubnetPrefix> {
    let mut prefixes: Vec<SubnetPrefix> = ips.iter().map(|&ip| SubnetPrefix::of(ip)).collect();
    prefixes.sort();
    prefixes.dedup();
    prefixes
}

/// Canonical subnets of an announced address, empty when resolution fails.
pub fn prefixes_for(resolver: &dyn Resolver, addr: &NetAddress) -> Vec<SubnetPrefix> {
    match resolver.resolve(addr.host()) {
        Ok(ips) => prefixes_of(&ips),
        Err(_) => Vec::new(),
    }
}

/// Tracks admitted subnets during a single selection pass.
///
/// `filtered` answers whether an address collides with anything admitted so
/// far; `add` admits the address's subnets. An address that cannot be
/// resolved is reported as filtered: without knowing its subnets its
/// diversity cannot be verified, but it also blocks nobody else since
/// nothing gets admitted for it.
pub struct IpFilter {
    resolver: Arc<dyn Resolver>,
    admitted: HashSet<SubnetPrefix>,
}

impl IpFilter {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            admitted: HashSet::new(),
        }
    }

    /// True if any subnet of `addr` overlaps an already-admitted subnet,
    /// or if the address cannot currently be resolved.
    pub fn filtered(&self, addr: &NetAddress) -> bool {
        let prefixes = prefixes_for(self.resolver.as_ref(), addr);
        if prefixes.is_empty() {
            return true;
        }
        prefixes.iter().any(|p| self.admitted.contains(p))
    }

    /// Admit all subnets of `addr`.
    pub fn add(&mut self, addr: &NetAddress) {
        for prefix in prefixes_for(self.resolver.as_ref(), addr) {
            self.admitted.insert(prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Resolver with a fixed host -> IP table.
    pub struct StaticResolver {
        table: HashMap<String, Vec<IpAddr>>,
    }

    impl StaticResolver {
        pub fn new(entries: &[(&str, &[&str])]) -> Self {
            let table = entries
                .iter()
                .map(|(host, ips)| {
                    let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
                    (host.to_string(), ips)
                })
                .collect();
            Self { table }
        }
    }

    impl Resolver for StaticResolver {
        fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.table
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
        }
    }

    #[test]
    fn test_ipv4_prefix() {
        let prefix = SubnetPrefix::of("203.0.113.77".parse().unwrap());
        assert_eq!(prefix.as_str(), "203.0.113.0/24");
    }

    #[test]
    fn test_ipv4_same_slash24_collide() {
        let a = SubnetPrefix::of("10.0.0.1".parse().unwrap());
        let b = SubnetPrefix::of("10.0.0.200".parse().unwrap());
        let c = SubnetPrefix::of("10.0.1.1".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ipv6_prefix_masks_fifty_four_bits() {
        // Bits below the /54 boundary are cleared, bits above are kept.
        let a = SubnetPrefix::of("2001:db8:1:123::1".parse().unwrap());
        let b = SubnetPrefix::of("2001:db8:1:3ff::2".parse().unwrap());
        let c = SubnetPrefix::of("2001:db8:1:400::1".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "2001:db8:1::/54");
    }

    #[test]
    fn test_filter_rejects_overlapping_subnet() {
        let resolver = Arc::new(StaticResolver::new(&[
            ("one.test", &["10.0.0.1"]),
            ("two.test", &["10.0.0.2"]),
            ("far.test", &["10.0.1.1"]),
        ]));
        let mut filter = IpFilter::new(resolver);

        let one = NetAddress::new("one.test:9982");
        let two = NetAddress::new("two.test:9982");
        let far = NetAddress::new("far.test:9982");

        assert!(!filter.filtered(&one));
        filter.add(&one);
        assert!(filter.filtered(&two));
        assert!(!filter.filtered(&far));
    }

    #[test]
    fn test_filter_handles_dual_stack_hosts() {
        let resolver = Arc::new(StaticResolver::new(&[
            ("dual.test", &["10.0.0.1", "2001:db8::1"]),
            ("v6only.test", &["2001:db8::2"]),
        ]));
        let mut filter = IpFilter::new(resolver);

        filter.add(&NetAddress::new("dual.test:9982"));
        // The v6-only host shares the dual host's /54.
        assert!(filter.filtered(&NetAddress::new("v6only.test:9982")));
    }

    #[test]
    fn test_unresolvable_host_is_filtered_but_admits_nothing() {
        let resolver = Arc::new(StaticResolver::new(&[("real.test", &["10.0.0.1"])]));
        let mut filter = IpFilter::new(resolver);

        let ghost = NetAddress::new("ghost.test:9982");
        assert!(filter.filtered(&ghost));

        // Adding the unresolvable host must not poison the filter.
        filter.add(&ghost);
        assert!(!filter.filtered(&NetAddress::new("real.test:9982")));
    }
}
