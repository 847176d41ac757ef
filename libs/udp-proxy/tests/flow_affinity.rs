//! Flow affinity properties of hash policies.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use edgeplane_networking::Address;
use edgeplane_udp_proxy::{xx_hash64, HashPolicy, HashPolicyConfig};
use proptest::prelude::*;

fn ip_address(ip: IpAddr, port: u16) -> Address {
    Address::from(SocketAddr::new(ip, port))
}

fn any_ip() -> impl Strategy<Value = IpAddr> {
    prop_oneof![
        any::<u32>().prop_map(|bits| IpAddr::V4(Ipv4Addr::from(bits))),
        any::<u128>().prop_map(|bits| IpAddr::V6(Ipv6Addr::from(bits))),
    ]
}

fn any_address() -> impl Strategy<Value = Address> {
    prop_oneof![
        (any_ip(), any::<u16>()).prop_map(|(ip, port)| ip_address(ip, port)),
        "[a-z]{1,12}".prop_map(|name| format!("internal:{}", name).parse::<Address>().unwrap()),
        "/[a-z]{1,12}".prop_map(|path| format!("unix:{}", path).parse::<Address>().unwrap()),
    ]
}

proptest! {
    #[test]
    fn source_ip_hash_is_deterministic(ip in any_ip(), port_a in any::<u16>(), port_b in any::<u16>()) {
        let policy = HashPolicy::new(&[HashPolicyConfig::source_ip()]).unwrap();

        let first = policy.generate_hash(&ip_address(ip, port_a));
        let second = policy.generate_hash(&ip_address(ip, port_b));

        prop_assert_eq!(first, Some(xx_hash64(ip.to_string().as_bytes())));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn source_ip_hash_absent_without_ip(address in any_address()) {
        let policy = HashPolicy::new(&[HashPolicyConfig::source_ip()]).unwrap();
        prop_assert_eq!(policy.generate_hash(&address).is_some(), address.is_ip());
    }

    #[test]
    fn key_hash_ignores_address(address in any_address()) {
        let policy = HashPolicy::new(&[HashPolicyConfig::key("route-42")]).unwrap();
        prop_assert_eq!(policy.generate_hash(&address), Some(xx_hash64(b"route-42")));
    }
}

#[test]
fn policies_with_same_key_agree() {
    let a = HashPolicy::new(&[HashPolicyConfig::key("abc")]).unwrap();
    let b = HashPolicy::new(&[HashPolicyConfig::key("abc")]).unwrap();
    let downstream: Address = "10.0.0.5:5353".parse().unwrap();

    assert_eq!(a.generate_hash(&downstream), b.generate_hash(&downstream));
}

#[test]
fn distinct_sources_hash_differently() {
    let policy = HashPolicy::new(&[HashPolicyConfig::source_ip()]).unwrap();

    let loopback = policy.generate_hash(&"127.0.0.1:5353".parse().unwrap());
    let private = policy.generate_hash(&"10.0.0.5:5353".parse().unwrap());

    assert_eq!(private, Some(xx_hash64(b"10.0.0.5")));
    assert_ne!(loopback, private);
}

#[test]
fn policy_shared_across_threads() {
    let policy = std::sync::Arc::new(HashPolicy::new(&[HashPolicyConfig::source_ip()]).unwrap());
    let expected = policy.generate_hash(&"10.0.0.5:1".parse().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let policy = std::sync::Arc::clone(&policy);
            std::thread::spawn(move || policy.generate_hash(&format!("10.0.0.5:{}", i + 1000).parse().unwrap()))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
