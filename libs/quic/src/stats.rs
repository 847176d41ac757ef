//! Counters written by the connection factory.
//!
//! [`StatsScope`] is a thread-safe registry of named counters under a prefix,
//! shared by every worker through `Arc`. [`QuicStatNames`] holds the counter
//! names the factory increments so they are built once, not per connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Named counters under a common prefix.
#[derive(Debug, Default)]
pub struct StatsScope {
    prefix: String,
    counters: RwLock<HashMap<String, Counter>>,
}

impl StatsScope {
    /// Create a scope. Counter names are reported as `{prefix}.{name}`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the counter called `name`.
    pub fn counter(&self, name: &str) -> Counter {
        let full_name = self.full_name(name);

        // Fast path: read lock
        if let Ok(counters) = self.counters.read() {
            if let Some(counter) = counters.get(&full_name) {
                return counter.clone();
            }
        }

        // Slow path: write lock
        match self.counters.write() {
            Ok(mut counters) => counters.entry(full_name).or_default().clone(),
            Err(poisoned) => poisoned
                .into_inner()
                .entry(full_name)
                .or_default()
                .clone(),
        }
    }

    /// Current value of `name`, 0 if it was never created.
    pub fn counter_value(&self, name: &str) -> u64 {
        let full_name = self.full_name(name);
        self.counters
            .read()
            .ok()
            .and_then(|counters| counters.get(&full_name).map(Counter::value))
            .unwrap_or(0)
    }

    /// Snapshot of every counter, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut values: Vec<(String, u64)> = self
            .counters
            .read()
            .map(|counters| {
                counters
                    .iter()
                    .map(|(name, counter)| (name.clone(), counter.value()))
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

/// Counter names used by upstream QUIC connection creation.
#[derive(Debug, Clone)]
pub struct QuicStatNames {
    pub connection_created: String,
    pub connection_closed: String,
    pub rtt_cache_hit: String,
    pub rtt_cache_miss: String,
}

impl QuicStatNames {
    /// Names under `quic.upstream`.
    pub fn new() -> Self {
        Self::with_prefix("quic.upstream")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            connection_created: format!("{}.connection_created", prefix),
            connection_closed: format!("{}.connection_closed", prefix),
            rtt_cache_hit: format!("{}.rtt_cache_hit", prefix),
            rtt_cache_miss: format!("{}.rtt_cache_miss", prefix),
        }
    }
}

impl Default for QuicStatNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_shared_by_name() {
        let scope = StatsScope::new("cluster.backend");
        scope.counter("cx_total").inc();
        scope.counter("cx_total").inc();

        assert_eq!(scope.counter_value("cx_total"), 2);
        assert_eq!(scope.counter_value("missing"), 0);
        assert_eq!(
            scope.snapshot(),
            vec![("cluster.backend.cx_total".to_string(), 2)]
        );
    }

    #[test]
    fn test_counters_across_threads() {
        let scope = Arc::new(StatsScope::new(""));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scope = Arc::clone(&scope);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        scope.counter("hits").inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(scope.counter_value("hits"), 400);
    }

    #[test]
    fn test_stat_names() {
        let names = QuicStatNames::new();
        assert_eq!(names.connection_created, "quic.upstream.connection_created");
        assert_eq!(names.rtt_cache_hit, "quic.upstream.rtt_cache_hit");
    }
}
