//! Per-thread memory of round-trip times to upstream servers.
//!
//! A fresh connection starts with the smoothed RTT last measured to the same
//! host and port instead of the protocol default, which makes its first
//! retransmission timers realistic.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::trace;

use crate::server_id::ServerId;

/// Default maximum number of remembered servers.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Origin {
    host: String,
    port: u16,
}

impl From<&ServerId> for Origin {
    fn from(server: &ServerId) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    srtt: HashMap<Origin, Duration>,
    /// Insertion order, oldest first.
    order: VecDeque<Origin>,
}

/// Bounded smoothed-RTT cache keyed by (host, port).
#[derive(Debug)]
pub struct RttCache {
    entries: RefCell<Entries>,
    max_entries: usize,
}

impl RttCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache holding at most `max_entries` servers (minimum 1).
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RefCell::new(Entries::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Last smoothed RTT measured to `server`.
    pub fn get_srtt(&self, server: &ServerId) -> Option<Duration> {
        self.entries
            .borrow()
            .srtt
            .get(&Origin::from(server))
            .copied()
    }

    /// Remember the smoothed RTT to `server`, evicting the oldest entry when full.
    pub fn set_srtt(&self, server: &ServerId, srtt: Duration) {
        let origin = Origin::from(server);
        let mut entries = self.entries.borrow_mut();

        if entries.srtt.insert(origin.clone(), srtt).is_some() {
            return;
        }
        entries.order.push_back(origin);

        while entries.order.len() > self.max_entries {
            if let Some(evicted) = entries.order.pop_front() {
                entries.srtt.remove(&evicted);
                trace!(host = %evicted.host, port = evicted.port, "Evicted RTT entry");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().srtt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().srtt.is_empty()
    }
}

impl Default for RttCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = RttCache::new();
        let server = ServerId::new("api.example.com", 443);

        assert!(cache.get_srtt(&server).is_none());
        cache.set_srtt(&server, Duration::from_millis(42));
        assert_eq!(cache.get_srtt(&server), Some(Duration::from_millis(42)));

        cache.set_srtt(&server, Duration::from_millis(40));
        assert_eq!(cache.get_srtt(&server), Some(Duration::from_millis(40)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_privacy_flag_does_not_split_entries() {
        let cache = RttCache::new();
        cache.set_srtt(&ServerId::new("api.example.com", 443), Duration::from_millis(10));

        let private = ServerId::new("api.example.com", 443).with_privacy_mode();
        assert_eq!(cache.get_srtt(&private), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_oldest_entry_evicted() {
        let cache = RttCache::with_capacity(2);
        let a = ServerId::new("a.example.com", 443);
        let b = ServerId::new("b.example.com", 443);
        let c = ServerId::new("c.example.com", 443);

        cache.set_srtt(&a, Duration::from_millis(1));
        cache.set_srtt(&b, Duration::from_millis(2));
        cache.set_srtt(&c, Duration::from_millis(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_srtt(&a).is_none());
        assert!(cache.get_srtt(&b).is_some());
        assert!(cache.get_srtt(&c).is_some());
    }

    proptest! {
        #[test]
        fn test_never_exceeds_capacity(
            capacity in 1usize..16,
            ports in proptest::collection::vec(any::<u16>(), 0..64),
        ) {
            let cache = RttCache::with_capacity(capacity);
            for port in &ports {
                cache.set_srtt(&ServerId::new("api.example.com", *port), Duration::from_millis(5));
                prop_assert!(cache.len() <= capacity);
            }
            if let Some(last) = ports.last() {
                let last_server = ServerId::new("api.example.com", *last);
                prop_assert!(cache.get_srtt(&last_server).is_some());
            }
        }
    }
}
