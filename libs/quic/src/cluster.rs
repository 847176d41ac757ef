//! Cluster descriptor consumed when building persistent QUIC info.

use serde::Deserialize;

use crate::config::{QuicProtocolConfig, QuicProtocolOptions};
use crate::error::ConfigError;

/// Default per-connection buffer limit (1 MiB).
pub const DEFAULT_BUFFER_LIMIT: u32 = 1024 * 1024;

/// Smallest usable buffer limit: one QUIC initial datagram.
pub const MIN_BUFFER_LIMIT: u32 = 1200;

fn default_buffer_limit() -> u32 {
    DEFAULT_BUFFER_LIMIT
}

/// The parts of an upstream cluster the QUIC layer reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterInfo {
    /// Cluster name; also the persistent info cache key.
    pub name: String,
    /// Bound on per-connection send buffering, in bytes.
    #[serde(default = "default_buffer_limit")]
    pub per_connection_buffer_limit_bytes: u32,
    /// QUIC tunables.
    #[serde(default)]
    pub quic_protocol_options: QuicProtocolOptions,
}

impl ClusterInfo {
    /// Create a descriptor with default limits and options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            per_connection_buffer_limit_bytes: DEFAULT_BUFFER_LIMIT,
            quic_protocol_options: QuicProtocolOptions::default(),
        }
    }

    /// Validate the descriptor and return its protocol configuration.
    pub fn validate(&self) -> Result<QuicProtocolConfig, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingClusterName);
        }

        if self.per_connection_buffer_limit_bytes < MIN_BUFFER_LIMIT {
            return Err(ConfigError::InvalidBufferLimit {
                cluster: self.name.clone(),
                limit: self.per_connection_buffer_limit_bytes,
                min: MIN_BUFFER_LIMIT,
            });
        }

        QuicProtocolConfig::from_options(&self.quic_protocol_options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let cluster: ClusterInfo = serde_json::from_str(r#"{"name": "backend"}"#).unwrap();
        assert_eq!(cluster, ClusterInfo::new("backend"));
        assert!(cluster.validate().is_ok());
    }

    #[test]
    fn test_missing_name() {
        let cluster = ClusterInfo::new("  ");
        assert_eq!(cluster.validate().unwrap_err(), ConfigError::MissingClusterName);
    }

    #[test]
    fn test_buffer_limit_too_small() {
        let mut cluster = ClusterInfo::new("backend");
        cluster.per_connection_buffer_limit_bytes = 512;

        match cluster.validate() {
            Err(ConfigError::InvalidBufferLimit { limit, min, .. }) => {
                assert_eq!(limit, 512);
                assert_eq!(min, MIN_BUFFER_LIMIT);
            }
            other => panic!("Expected InvalidBufferLimit, got {:?}", other),
        }
    }
}
