//! Network address model for the data plane.
//!
//! This library provides:
//! - A closed [`Address`] type covering IP, pipe (unix domain) and internal
//!   listener addresses
//! - Canonical string forms used for hashing and logging
//! - Parsing from the textual forms accepted in configuration
//!
//! Only [`Address::Ip`] carries an IP representation. Pipe and internal
//! addresses are valid downstream/upstream identities but cannot be hashed by
//! source IP and cannot be dialed over UDP.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Prefix for unix domain socket addresses (e.g., "unix:/run/edge.sock").
pub const PIPE_PREFIX: &str = "unix:";

/// Prefix for in-process listener addresses (e.g., "internal:udp_ingress").
pub const INTERNAL_PREFIX: &str = "internal:";

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid address text.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

// ============================================================================
// Address
// ============================================================================

/// A network address as seen by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IPv4 or IPv6 address with port.
    Ip(SocketAddr),

    /// Filesystem socket path.
    Pipe(PathBuf),

    /// Named in-process listener.
    Internal(String),
}

impl Address {
    /// Create an IP address from any socket address.
    pub fn ip_addr(addr: impl Into<SocketAddr>) -> Self {
        Self::Ip(addr.into())
    }

    /// Get the IP of this address, if it has one.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(addr) => Some(addr.ip()),
            Self::Pipe(_) | Self::Internal(_) => None,
        }
    }

    /// Get the socket address, if this is an IP address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Ip(addr) => Some(*addr),
            Self::Pipe(_) | Self::Internal(_) => None,
        }
    }

    /// Canonical text of the IP without the port (e.g., "10.0.0.5", "::1").
    ///
    /// IPv6 addresses use the compressed RFC 5952 form. Returns None for
    /// addresses without an IP.
    pub fn address_as_string(&self) -> Option<String> {
        self.ip().map(|ip| ip.to_string())
    }

    /// Get the port, if this is an IP address.
    pub fn port(&self) -> Option<u16> {
        self.socket_addr().map(|addr| addr.port())
    }

    /// Check if this address carries an IP.
    pub fn is_ip(&self) -> bool {
        matches!(self, Self::Ip(_))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{}", addr),
            Self::Pipe(path) => write!(f, "{}{}", PIPE_PREFIX, path.display()),
            Self::Internal(name) => write!(f, "{}{}", INTERNAL_PREFIX, name),
        }
    }
}

impl FromStr for Address {
    type Err = NetworkError;

    /// Parse an address.
    ///
    /// Accepted forms:
    /// - `10.0.0.5:53`, `[::1]:443`
    /// - `10.0.0.5`, `::1` (port 0)
    /// - `unix:/path/to/socket`
    /// - `internal:listener_name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NetworkError::InvalidAddress("empty address".to_string()));
        }

        if let Some(path) = s.strip_prefix(PIPE_PREFIX) {
            if path.is_empty() {
                return Err(NetworkError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Pipe(PathBuf::from(path)));
        }

        if let Some(name) = s.strip_prefix(INTERNAL_PREFIX) {
            if name.is_empty() {
                return Err(NetworkError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Internal(name.to_string()));
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Ip(addr));
        }

        s.parse::<IpAddr>()
            .map(|ip| Self::Ip(SocketAddr::new(ip, 0)))
            .map_err(|_| NetworkError::InvalidAddress(s.to_string()))
    }
}
