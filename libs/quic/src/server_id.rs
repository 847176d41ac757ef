//! Logical upstream identity.

use std::fmt;

/// Identifies the upstream endpoint a connection is for.
///
/// `host` is used as the TLS server name; it is not resolved here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
    pub host: String,
    pub port: u16,
    /// Disables anything that would link this connection to earlier ones:
    /// TLS session resumption, early data, and the RTT cache.
    pub privacy_mode_enabled: bool,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            privacy_mode_enabled: false,
        }
    }

    #[must_use]
    pub fn with_privacy_mode(mut self) -> Self {
        self.privacy_mode_enabled = true;
        self
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
