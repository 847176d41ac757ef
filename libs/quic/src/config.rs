//! QUIC protocol tunables.
//!
//! [`QuicProtocolOptions`] is the raw, serde-friendly form carried by a cluster
//! descriptor. [`QuicProtocolConfig`] is the validated form kept by persistent
//! QUIC info and turned into engine transport configuration.
//!
//! Ranges:
//! - max_concurrent_streams: 1..=2^31-1 (default 100)
//! - initial_stream_window_size: 1..=16 MiB (default 16 MiB)
//! - initial_connection_window_size: 1..=25 MiB, at least the stream window (default 24 MiB)
//! - idle_timeout_secs: 1..=600 (default 300)
//! - keep_alive_interval_ms: optional, shorter than the idle timeout
//! - initial_rtt_ms: 1..=10000 (default 333)

use std::time::Duration;

use quinn_proto::{IdleTimeout, TransportConfig, VarInt};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
pub const MAX_CONCURRENT_STREAMS_LIMIT: u32 = (1 << 31) - 1;

pub const DEFAULT_STREAM_WINDOW_SIZE: u32 = 16 * 1024 * 1024;
pub const MAX_STREAM_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

pub const DEFAULT_CONNECTION_WINDOW_SIZE: u32 = 24 * 1024 * 1024;
pub const MAX_CONNECTION_WINDOW_SIZE: u32 = 25 * 1024 * 1024;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);
pub const MAX_INITIAL_RTT: Duration = Duration::from_secs(10);

/// Raw QUIC options from a cluster descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuicProtocolOptions {
    /// Maximum concurrent bidirectional streams per connection.
    pub max_concurrent_streams: u32,
    /// Initial per-stream flow-control window, in bytes.
    pub initial_stream_window_size: u32,
    /// Initial connection-level flow-control window, in bytes.
    pub initial_connection_window_size: u32,
    /// Idle timeout, in seconds.
    pub idle_timeout_secs: u64,
    /// Keep-alive PING interval, in milliseconds. Disabled when unset.
    pub keep_alive_interval_ms: Option<u64>,
    /// RTT assumed before the first sample, in milliseconds.
    pub initial_rtt_ms: u64,
}

impl Default for QuicProtocolOptions {
    fn default() -> Self {
        Self {
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_stream_window_size: DEFAULT_STREAM_WINDOW_SIZE,
            initial_connection_window_size: DEFAULT_CONNECTION_WINDOW_SIZE,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            keep_alive_interval_ms: None,
            initial_rtt_ms: DEFAULT_INITIAL_RTT.as_millis() as u64,
        }
    }
}

/// Validated QUIC tunables.
#[derive(Debug, Clone)]
pub struct QuicProtocolConfig {
    max_concurrent_streams: u32,
    stream_window: u32,
    connection_window: u32,
    idle_timeout: Duration,
    max_idle_timeout: IdleTimeout,
    keep_alive_interval: Option<Duration>,
    initial_rtt: Duration,
}

impl QuicProtocolConfig {
    /// Validate raw options.
    pub fn from_options(options: &QuicProtocolOptions) -> Result<Self, ConfigError> {
        let max_concurrent_streams = options.max_concurrent_streams;
        if max_concurrent_streams == 0 || max_concurrent_streams > MAX_CONCURRENT_STREAMS_LIMIT {
            return Err(ConfigError::option(
                "max_concurrent_streams",
                format!(
                    "{} (must be between 1 and {})",
                    max_concurrent_streams, MAX_CONCURRENT_STREAMS_LIMIT
                ),
            ));
        }

        let stream_window = options.initial_stream_window_size;
        if stream_window == 0 || stream_window > MAX_STREAM_WINDOW_SIZE {
            return Err(ConfigError::option(
                "initial_stream_window_size",
                format!(
                    "{} (must be between 1 and {})",
                    stream_window, MAX_STREAM_WINDOW_SIZE
                ),
            ));
        }

        let connection_window = options.initial_connection_window_size;
        if connection_window == 0 || connection_window > MAX_CONNECTION_WINDOW_SIZE {
            return Err(ConfigError::option(
                "initial_connection_window_size",
                format!(
                    "{} (must be between 1 and {})",
                    connection_window, MAX_CONNECTION_WINDOW_SIZE
                ),
            ));
        }
        if connection_window < stream_window {
            return Err(ConfigError::option(
                "initial_connection_window_size",
                format!(
                    "{} is smaller than the stream window {}",
                    connection_window, stream_window
                ),
            ));
        }

        let idle_timeout = Duration::from_secs(options.idle_timeout_secs);
        if idle_timeout.is_zero() || idle_timeout > MAX_IDLE_TIMEOUT {
            return Err(ConfigError::option(
                "idle_timeout_secs",
                format!(
                    "{} (must be between 1 and {})",
                    options.idle_timeout_secs,
                    MAX_IDLE_TIMEOUT.as_secs()
                ),
            ));
        }
        let max_idle_timeout = IdleTimeout::try_from(idle_timeout)
            .map_err(|e| ConfigError::option("idle_timeout_secs", e.to_string()))?;

        let keep_alive_interval = options.keep_alive_interval_ms.map(Duration::from_millis);
        if let Some(interval) = keep_alive_interval {
            if interval.is_zero() || interval >= idle_timeout {
                return Err(ConfigError::option(
                    "keep_alive_interval_ms",
                    format!(
                        "{}ms (must be positive and shorter than the idle timeout)",
                        interval.as_millis()
                    ),
                ));
            }
        }

        let initial_rtt = Duration::from_millis(options.initial_rtt_ms);
        if initial_rtt.is_zero() || initial_rtt > MAX_INITIAL_RTT {
            return Err(ConfigError::option(
                "initial_rtt_ms",
                format!(
                    "{} (must be between 1 and {})",
                    options.initial_rtt_ms,
                    MAX_INITIAL_RTT.as_millis()
                ),
            ));
        }

        Ok(Self {
            max_concurrent_streams,
            stream_window,
            connection_window,
            idle_timeout,
            max_idle_timeout,
            keep_alive_interval,
            initial_rtt,
        })
    }

    /// Build engine transport configuration.
    ///
    /// `initial_rtt` overrides the configured initial RTT, e.g. with a
    /// smoothed RTT remembered from an earlier connection to the same server.
    pub fn transport_config(&self, initial_rtt: Option<Duration>) -> TransportConfig {
        let mut transport = TransportConfig::default();
        transport
            .max_concurrent_bidi_streams(VarInt::from_u32(self.max_concurrent_streams))
            .stream_receive_window(VarInt::from_u32(self.stream_window))
            .receive_window(VarInt::from_u32(self.connection_window))
            .send_window(u64::from(self.connection_window))
            .max_idle_timeout(Some(self.max_idle_timeout))
            .keep_alive_interval(self.keep_alive_interval)
            .initial_rtt(initial_rtt.unwrap_or(self.initial_rtt));
        transport
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.max_concurrent_streams
    }

    pub fn stream_window(&self) -> u32 {
        self.stream_window
    }

    pub fn connection_window(&self) -> u32 {
        self.connection_window
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive_interval
    }

    pub fn initial_rtt(&self) -> Duration {
        self.initial_rtt
    }
}
