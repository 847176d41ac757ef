//! Hash policies for UDP flow affinity.
//!
//! A [`HashPolicy`] turns a downstream source address into a routing hash so
//! that datagrams of one flow reach the same upstream host. Two methods exist:
//! - Source IP: xxHash64 of the canonical IP text (port excluded)
//! - Fixed key: one precomputed hash shared by every flow
//!
//! Policies are immutable once built and safe to share across workers.

use edgeplane_networking::Address;
use serde::Deserialize;

use crate::error::ConfigError;

/// Seed used for every policy hash.
pub const HASH_SEED: u64 = 0;

/// xxHash64 of `bytes` with seed 0.
pub fn xx_hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, HASH_SEED)
}

/// Which input a hash policy uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySpecifier {
    SourceIp,
    Key(String),
    NotSet,
}

/// One hash policy entry from a UDP proxy configuration.
///
/// Deserialized from `{"source_ip": true}`, `{"key": "..."}`, or `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawHashPolicyConfig")]
pub struct HashPolicyConfig {
    pub policy_specifier: PolicySpecifier,
}

impl HashPolicyConfig {
    pub fn source_ip() -> Self {
        Self {
            policy_specifier: PolicySpecifier::SourceIp,
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self {
            policy_specifier: PolicySpecifier::Key(key.into()),
        }
    }

    pub fn not_set() -> Self {
        Self {
            policy_specifier: PolicySpecifier::NotSet,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHashPolicyConfig {
    #[serde(default)]
    source_ip: bool,
    #[serde(default)]
    key: Option<String>,
}

impl TryFrom<RawHashPolicyConfig> for HashPolicyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawHashPolicyConfig) -> Result<Self, Self::Error> {
        let policy_specifier = match (raw.source_ip, raw.key) {
            (true, Some(_)) => return Err(ConfigError::ConflictingSpecifiers),
            (true, None) => PolicySpecifier::SourceIp,
            (false, Some(key)) => PolicySpecifier::Key(key),
            (false, None) => PolicySpecifier::NotSet,
        };
        Ok(Self { policy_specifier })
    }
}

/// How a policy derives a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashMethod {
    /// Hash of the downstream IP text.
    SourceIp,
    /// Hash of a configured key, computed once.
    Key { hash: u64 },
}

impl HashMethod {
    /// Hash for `downstream`, or None if this method has no input for it.
    pub fn evaluate(&self, downstream: &Address) -> Option<u64> {
        match self {
            HashMethod::SourceIp => {
                let ip = downstream.address_as_string()?;
                debug_assert!(!ip.is_empty(), "IP address rendered as empty string");
                if ip.is_empty() {
                    return None;
                }
                Some(xx_hash64(ip.as_bytes()))
            }
            HashMethod::Key { hash } => Some(*hash),
        }
    }
}

/// A validated hash policy holding exactly one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPolicy {
    method: HashMethod,
}

impl HashPolicy {
    /// Build a policy from exactly one configuration entry.
    ///
    /// Fails on zero or several entries, an unset specifier, or an empty key.
    pub fn new(policies: &[HashPolicyConfig]) -> Result<Self, ConfigError> {
        Self::select_method(policies)?
            .map(|method| Self { method })
            .ok_or(ConfigError::SpecifierNotSet)
    }

    /// Like [`HashPolicy::new`], but an unset specifier yields `Ok(None)`.
    pub fn create_optional(policies: &[HashPolicyConfig]) -> Result<Option<Self>, ConfigError> {
        Ok(Self::select_method(policies)?.map(|method| Self { method }))
    }

    fn select_method(policies: &[HashPolicyConfig]) -> Result<Option<HashMethod>, ConfigError> {
        let [policy] = policies else {
            return Err(ConfigError::UnsupportedPolicyCount(policies.len()));
        };

        match &policy.policy_specifier {
            PolicySpecifier::SourceIp => Ok(Some(HashMethod::SourceIp)),
            PolicySpecifier::Key(key) => {
                if key.is_empty() {
                    return Err(ConfigError::EmptyKey);
                }
                Ok(Some(HashMethod::Key {
                    hash: xx_hash64(key.as_bytes()),
                }))
            }
            PolicySpecifier::NotSet => Ok(None),
        }
    }

    /// Routing hash for a datagram from `downstream`.
    pub fn generate_hash(&self, downstream: &Address) -> Option<u64> {
        self.method.evaluate(downstream)
    }

    pub fn method(&self) -> &HashMethod {
        &self.method
    }
}
