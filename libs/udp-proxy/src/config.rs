//! UDP proxy listener filter configuration.

use std::time::Duration;

use edgeplane_networking::Address;
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::hash_policy::{HashPolicy, HashPolicyConfig};

/// Default idle timeout for a UDP session (60 seconds).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

/// Raw filter configuration, as carried by a listener definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UdpProxyConfig {
    /// Prefix for the filter's stats.
    pub stat_prefix: String,
    /// Upstream cluster datagrams are forwarded to.
    pub cluster: String,
    /// Session idle timeout, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// At most one entry is supported. Empty means no flow affinity.
    #[serde(default)]
    pub hash_policies: Vec<HashPolicyConfig>,
}

/// Validated filter configuration, shared by every worker.
#[derive(Debug, Clone)]
pub struct UdpProxyFilterConfig {
    stat_prefix: String,
    cluster: String,
    idle_timeout: Duration,
    hash_policy: Option<HashPolicy>,
}

impl UdpProxyFilterConfig {
    /// Validate `config`. A bad hash policy fails the whole filter.
    pub fn new(config: &UdpProxyConfig) -> Result<Self, ConfigError> {
        if config.stat_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField("stat_prefix"));
        }
        if config.cluster.trim().is_empty() {
            return Err(ConfigError::MissingField("cluster"));
        }
        if config.idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidIdleTimeout);
        }

        let hash_policy = if config.hash_policies.is_empty() {
            None
        } else {
            Some(HashPolicy::new(&config.hash_policies)?)
        };

        debug!(
            stat_prefix = %config.stat_prefix,
            cluster = %config.cluster,
            hash_policy = ?hash_policy.as_ref().map(HashPolicy::method),
            "UDP proxy filter configured"
        );

        Ok(Self {
            stat_prefix: config.stat_prefix.clone(),
            cluster: config.cluster.clone(),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            hash_policy,
        })
    }

    pub fn stat_prefix(&self) -> &str {
        &self.stat_prefix
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn hash_policy(&self) -> Option<&HashPolicy> {
        self.hash_policy.as_ref()
    }

    /// Routing hash for a datagram from `downstream`, if any.
    pub fn hash_for(&self, downstream: &Address) -> Option<u64> {
        self.hash_policy
            .as_ref()
            .and_then(|policy| policy.generate_hash(downstream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_policy::xx_hash64;

    fn parse(json: &str) -> UdpProxyConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(r#"{"stat_prefix": "dns", "cluster": "resolvers"}"#);
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert!(config.hash_policies.is_empty());

        let filter = UdpProxyFilterConfig::new(&config).unwrap();
        assert_eq!(filter.idle_timeout(), Duration::from_secs(60));
        assert!(filter.hash_policy().is_none());
        assert_eq!(filter.hash_for(&"10.0.0.5:53".parse().unwrap()), None);
    }

    #[test]
    fn test_source_ip_policy() {
        let config = parse(
            r#"{"stat_prefix": "dns", "cluster": "resolvers", "hash_policies": [{"source_ip": true}]}"#,
        );
        let filter = UdpProxyFilterConfig::new(&config).unwrap();

        assert_eq!(
            filter.hash_for(&"10.0.0.5:5353".parse().unwrap()),
            Some(xx_hash64(b"10.0.0.5"))
        );
    }

    #[test]
    fn test_unset_policy_rejects_filter() {
        let config = parse(r#"{"stat_prefix": "dns", "cluster": "resolvers", "hash_policies": [{}]}"#);
        assert_eq!(
            UdpProxyFilterConfig::new(&config).unwrap_err(),
            ConfigError::SpecifierNotSet
        );
    }

    #[test]
    fn test_two_policies_rejected() {
        let config = parse(
            r#"{"stat_prefix": "dns", "cluster": "resolvers",
                "hash_policies": [{"source_ip": true}, {"key": "abc"}]}"#,
        );
        assert_eq!(
            UdpProxyFilterConfig::new(&config).unwrap_err(),
            ConfigError::UnsupportedPolicyCount(2)
        );
    }

    #[test]
    fn test_required_fields() {
        let mut config = parse(r#"{"stat_prefix": "dns", "cluster": "resolvers"}"#);

        config.cluster = String::new();
        assert_eq!(
            UdpProxyFilterConfig::new(&config).unwrap_err(),
            ConfigError::MissingField("cluster")
        );

        config.cluster = "resolvers".to_string();
        config.stat_prefix = " ".to_string();
        assert_eq!(
            UdpProxyFilterConfig::new(&config).unwrap_err(),
            ConfigError::MissingField("stat_prefix")
        );

        config.stat_prefix = "dns".to_string();
        config.idle_timeout_ms = 0;
        assert_eq!(
            UdpProxyFilterConfig::new(&config).unwrap_err(),
            ConfigError::InvalidIdleTimeout
        );
    }
}
