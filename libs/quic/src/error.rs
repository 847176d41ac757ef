//! Error types for persistent QUIC state and connection creation.

use thiserror::Error;

use crate::dispatcher::DispatcherId;

/// Errors raised while building persistent QUIC state or crypto configuration.
///
/// These are configuration errors: nothing is partially constructed when one
/// is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The cluster descriptor has no name.
    #[error("cluster name is required")]
    MissingClusterName,

    /// The per-connection buffer limit cannot hold a single initial datagram.
    #[error("invalid buffer limit for cluster '{cluster}': {limit} (must be at least {min})")]
    InvalidBufferLimit {
        cluster: String,
        limit: u32,
        min: u32,
    },

    /// A QUIC protocol option is out of range.
    #[error("invalid QUIC protocol option {option}: {reason}")]
    InvalidProtocolOption {
        option: &'static str,
        reason: String,
    },

    /// The TLS client configuration cannot be used for QUIC.
    #[error("invalid crypto configuration: {0}")]
    InvalidCrypto(String),
}

impl ConfigError {
    pub(crate) fn option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidProtocolOption {
            option,
            reason: reason.into(),
        }
    }
}

/// Errors raised by a single connection-creation call.
///
/// None of these leave the persistent state unusable.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The persistent state was built on a different dispatcher.
    #[error("persistent QUIC info belongs to dispatcher {expected}, called from dispatcher {actual}")]
    DispatcherMismatch {
        expected: DispatcherId,
        actual: DispatcherId,
    },

    /// The server or local address has no IP.
    #[error("{role} address {address} is not a resolved IP address")]
    UnresolvedAddress {
        role: &'static str,
        address: String,
    },

    /// The QUIC engine refused to start the connection.
    #[error("failed to start QUIC connection: {0}")]
    Connect(#[from] quinn_proto::ConnectError),
}

impl FactoryError {
    /// Returns true if this error reports a caller contract violation.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, FactoryError::DispatcherMismatch { .. })
    }
}
