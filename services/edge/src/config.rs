//! Edge worker configuration.
//!
//! Everything is read from `EDGE_*` environment variables. The UDP proxy
//! filter configuration is passed as JSON in `EDGE_UDP_PROXY_CONFIG`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use edgeplane_networking::Address;
use edgeplane_quic::ClusterInfo;
use edgeplane_udp_proxy::UdpProxyConfig;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 64;

/// Upstream to probe with a QUIC handshake.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Address the handshake is sent to.
    pub addr: SocketAddr,

    /// TLS server name.
    pub host: String,

    /// ALPN protocols offered.
    pub alpn: Vec<String>,

    /// PEM file with trusted CA certificates.
    pub ca_file: Option<PathBuf>,

    /// How long each worker waits for the handshake.
    pub probe_timeout: Duration,
}

/// Edge configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Number of worker threads, each with its own dispatcher.
    pub workers: usize,

    /// Upstream cluster descriptor.
    pub cluster: ClusterInfo,

    pub upstream: Option<UpstreamConfig>,

    /// UDP proxy filter configuration, validated at start-up.
    pub udp_proxy: Option<UdpProxyConfig>,

    /// Downstream addresses to report flow hashes for.
    pub hash_addresses: Vec<Address>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = lookup("EDGE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let workers: usize = lookup("EDGE_WORKERS")
            .map(|v| v.parse())
            .transpose()
            .context("EDGE_WORKERS must be an integer.")?
            .unwrap_or(1)
            .clamp(1, MAX_WORKERS);

        let cluster_name = lookup("EDGE_CLUSTER_NAME")
            .filter(|v| !v.trim().is_empty())
            .context("Missing cluster name. Set EDGE_CLUSTER_NAME.")?;
        let mut cluster = ClusterInfo::new(cluster_name);

        if let Some(limit) = lookup("EDGE_CLUSTER_BUFFER_LIMIT") {
            cluster.per_connection_buffer_limit_bytes = limit
                .parse()
                .context("EDGE_CLUSTER_BUFFER_LIMIT must be an integer (bytes).")?;
        }
        if let Some(idle) = lookup("EDGE_QUIC_IDLE_TIMEOUT_SECS") {
            cluster.quic_protocol_options.idle_timeout_secs = idle
                .parse()
                .context("EDGE_QUIC_IDLE_TIMEOUT_SECS must be an integer (seconds).")?;
        }

        let upstream = lookup("EDGE_UPSTREAM_ADDR")
            .map(|addr| -> Result<UpstreamConfig> {
                let addr: SocketAddr = addr
                    .parse()
                    .context("EDGE_UPSTREAM_ADDR must be a socket address (ip:port).")?;

                let host = lookup("EDGE_UPSTREAM_HOST").unwrap_or_else(|| addr.ip().to_string());

                let alpn = lookup("EDGE_ALPN")
                    .map(|v| split_list(&v))
                    .unwrap_or_else(|| vec!["h3".to_string()]);

                let probe_timeout_ms: u64 = lookup("EDGE_PROBE_TIMEOUT_MS")
                    .map(|v| v.parse())
                    .transpose()
                    .context("EDGE_PROBE_TIMEOUT_MS must be an integer (milliseconds).")?
                    .unwrap_or(3000);

                Ok(UpstreamConfig {
                    addr,
                    host,
                    alpn,
                    ca_file: lookup("EDGE_UPSTREAM_CA_FILE").map(PathBuf::from),
                    probe_timeout: Duration::from_millis(probe_timeout_ms.max(10)),
                })
            })
            .transpose()?;

        let udp_proxy = lookup("EDGE_UDP_PROXY_CONFIG")
            .map(|json| serde_json::from_str::<UdpProxyConfig>(&json))
            .transpose()
            .context("EDGE_UDP_PROXY_CONFIG must be a JSON UDP proxy configuration.")?;

        let hash_addresses = lookup("EDGE_HASH_ADDRESSES")
            .map(|v| {
                split_list(&v)
                    .iter()
                    .map(|a| a.parse::<Address>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .context("EDGE_HASH_ADDRESSES must be a comma-separated list of addresses.")?
            .unwrap_or_default();

        Ok(Self {
            log_level,
            workers,
            cluster,
            upstream,
            udp_proxy,
            hash_addresses,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
