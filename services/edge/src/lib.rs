//! Edge worker process.
//!
//! Validates the UDP proxy filter configuration and runs worker threads that
//! each own a dispatcher, a persistent QUIC info cache, and an RTT cache.

pub mod config;
pub mod tls;
pub mod worker;

pub use config::{Config, UpstreamConfig};
pub use worker::{run_worker, spawn_workers, ProbeOutcome, SharedState, WorkerReport};
