//! UDP proxy filter configuration and flow affinity.
//!
//! The filter forwards datagrams to an upstream cluster. With a hash policy
//! configured, each datagram carries a routing hash derived from its source
//! so the load balancer keeps a flow on one upstream host.

pub mod config;
pub mod error;
pub mod hash_policy;

pub use config::{UdpProxyConfig, UdpProxyFilterConfig};
pub use error::ConfigError;
pub use hash_policy::{xx_hash64, HashMethod, HashPolicy, HashPolicyConfig, PolicySpecifier};
