//! Error types for UDP proxy configuration.

use thiserror::Error;

/// Errors raised while validating a UDP proxy filter configuration.
///
/// Any of these keeps the listener from becoming active.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Exactly one hash policy is supported.
    #[error("expected exactly one hash policy, got {0}")]
    UnsupportedPolicyCount(usize),

    #[error("hash policy specifier not set")]
    SpecifierNotSet,

    #[error("hash policy key must not be empty")]
    EmptyKey,

    /// Both `source_ip` and `key` were given for one policy.
    #[error("hash policy sets both source_ip and key")]
    ConflictingSpecifiers,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("idle timeout must be positive")]
    InvalidIdleTimeout,
}
