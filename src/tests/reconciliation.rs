//! Contract-set reconciliation against the subnet-diversity rule.

use crate::config::HostDbConfig;
use crate::types::NetAddress;

use super::util::{key_of, priced_entry, test_db};

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Contracts with a@10.0.0.1 (held 10s), b@10.0.0.2 (held 5s) and
/// c@10.0.1.1 (held 7s): only b, the younger half of the conflicting
/// pair, is reported.
#[test]
fn test_younger_of_conflicting_pair_is_pruned() {
    let db = test_db(HostDbConfig::default());

    let mut a = priced_entry(1, 1, 1, 1);
    a.net_address = NetAddress::new("10-0-0-1.test:9982");
    let mut b = priced_entry(2, 1, 1, 1);
    b.net_address = NetAddress::new("10-0-0-2.test:9982");
    let mut c = priced_entry(3, 1, 1, 1);
    c.net_address = NetAddress::new("10-0-1-1.test:9982");

    db.insert(a.clone()).unwrap();
    db.insert(b.clone()).unwrap();
    db.insert(c.clone()).unwrap();

    let now = now();
    a.last_ipnet_change = now - 10;
    b.last_ipnet_change = now - 5;
    c.last_ipnet_change = now - 7;
    db.modify(a).unwrap();
    db.modify(b).unwrap();
    db.modify(c).unwrap();

    let violations = db.check_for_ip_violations(&[key_of(1), key_of(2), key_of(3)]);
    assert_eq!(violations, vec![key_of(2)]);

    // The pruned host stays in the database and can be picked again once
    // the conflict is gone.
    assert!(db.host(&key_of(2)).is_some());
}

/// Reconciliation does not depend on the order the caller lists the
/// contract hosts in; only subnet age decides.
#[test]
fn test_violation_check_is_order_independent() {
    let db = test_db(HostDbConfig::default());

    let mut a = priced_entry(1, 1, 1, 1);
    a.net_address = NetAddress::new("10-0-0-1.test:9982");
    let mut b = priced_entry(2, 1, 1, 1);
    b.net_address = NetAddress::new("10-0-0-2.test:9982");

    db.insert(a.clone()).unwrap();
    db.insert(b.clone()).unwrap();

    let now = now();
    a.last_ipnet_change = now - 100;
    b.last_ipnet_change = now - 50;
    db.modify(a).unwrap();
    db.modify(b).unwrap();

    let forward = db.check_for_ip_violations(&[key_of(1), key_of(2)]);
    let reverse = db.check_for_ip_violations(&[key_of(2), key_of(1)]);
    assert_eq!(forward, vec![key_of(2)]);
    assert_eq!(forward, reverse);
}
