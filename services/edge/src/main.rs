//! edgeplane edge
//!
//! Data-plane edge process.
//!
//! This service:
//! - Validates the UDP proxy filter configuration (a bad hash policy aborts start-up)
//! - Reports flow hashes for configured downstream addresses
//! - Runs one worker thread per dispatcher, each with its own persistent QUIC state
//! - Probes the upstream with a QUIC handshake from every worker

use std::sync::Arc;

use anyhow::{Context, Result};
use edgeplane_edge::{spawn_workers, tls, Config, SharedState};
use edgeplane_quic::{QuicStatNames, StatsScope};
use edgeplane_udp_proxy::UdpProxyFilterConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EDGE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting edgeplane edge");
    info!(
        cluster = %config.cluster.name,
        workers = config.workers,
        upstream = ?config.upstream.as_ref().map(|u| u.addr),
        udp_proxy = config.udp_proxy.is_some(),
        "Configuration loaded"
    );

    let filter = config
        .udp_proxy
        .as_ref()
        .map(UdpProxyFilterConfig::new)
        .transpose()
        .context("Invalid UDP proxy configuration")?;

    match &filter {
        Some(filter) => {
            info!(
                stat_prefix = filter.stat_prefix(),
                cluster = filter.cluster(),
                idle_timeout_ms = filter.idle_timeout().as_millis() as u64,
                hash_policy = ?filter.hash_policy().map(|p| p.method()),
                "UDP proxy filter active"
            );
            for address in &config.hash_addresses {
                match filter.hash_for(address) {
                    Some(hash) => info!(address = %address, hash, "Flow hash"),
                    None => info!(address = %address, "No flow hash for address"),
                }
            }
        }
        None if !config.hash_addresses.is_empty() => {
            warn!("EDGE_HASH_ADDRESSES set without EDGE_UDP_PROXY_CONFIG, ignoring");
        }
        None => {}
    }

    let crypto = config
        .upstream
        .as_ref()
        .map(tls::build_crypto)
        .transpose()?
        .map(Arc::new);

    let scope = Arc::new(StatsScope::new(format!("cluster.{}", config.cluster.name)));
    let shared = SharedState {
        crypto,
        scope: Arc::clone(&scope),
        stat_names: QuicStatNames::new(),
    };

    let handles = spawn_workers(Arc::new(config), shared)?;

    let mut failures = 0usize;
    for handle in handles {
        match handle.join() {
            Ok(Ok(report)) => {
                info!(
                    worker = report.worker,
                    dispatcher = %report.dispatcher,
                    outcome = %report.outcome,
                    "Worker report"
                );
            }
            Ok(Err(e)) => {
                error!(error = %format!("{:#}", e), "Worker failed");
                failures += 1;
            }
            Err(_) => {
                error!("Worker panicked");
                failures += 1;
            }
        }
    }

    info!(counters = ?scope.snapshot(), "Edge finished");

    if failures > 0 {
        anyhow::bail!("{} worker(s) failed", failures);
    }
    Ok(())
}
