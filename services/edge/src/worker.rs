//! Worker threads.
//!
//! Each worker owns one [`LocalDispatcher`] and runs its event loop on a
//! current-thread tokio runtime:
//! - Builds persistent QUIC info for the cluster through a per-thread cache
//! - Creates an upstream connection through the factory, when configured
//! - Moves datagrams between a UDP socket and the connection
//! - Sleeps until the dispatcher's next deadline and fires expired timers
//!
//! Nothing thread-affine leaves the worker thread; only the report does.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::BytesMut;
use edgeplane_networking::Address;
use edgeplane_quic::{
    create_quic_network_connection, ConnectionEvent, CryptoConfig, Dispatcher, LocalDispatcher,
    PersistentQuicInfoCache, QuicClientConnection, QuicStatNames, RttCache, ServerId, StatsScope,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::{Config, UpstreamConfig};

/// Largest datagram a worker reads.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Application error code sent when a probe closes its connection.
const PROBE_CLOSE_CODE: u32 = 0;

/// State shared by every worker.
#[derive(Debug, Clone)]
pub struct SharedState {
    /// Crypto configuration for upstream handshakes. Unset when no upstream
    /// is configured.
    pub crypto: Option<Arc<CryptoConfig>>,
    pub scope: Arc<StatsScope>,
    pub stat_names: QuicStatNames,
}

/// Result of one worker's upstream probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No upstream configured.
    Skipped,
    Connected { rtt: Duration },
    Failed { reason: String },
    TimedOut,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Connected { rtt } => write!(f, "connected (rtt {}ms)", rtt.as_millis()),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// What a worker reports when it finishes.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker: usize,
    pub dispatcher: String,
    pub outcome: ProbeOutcome,
}

/// Spawn `config.workers` worker threads.
pub fn spawn_workers(
    config: Arc<Config>,
    shared: SharedState,
) -> Result<Vec<JoinHandle<Result<WorkerReport>>>> {
    (0..config.workers)
        .map(|index| {
            let config = Arc::clone(&config);
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("worker_{}", index))
                .spawn(move || run_worker(index, &config, &shared))
                .with_context(|| format!("Failed to spawn worker {}", index))
        })
        .collect()
}

/// Run one worker to completion on the calling thread.
pub fn run_worker(index: usize, config: &Config, shared: &SharedState) -> Result<WorkerReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build worker runtime")?;

    let local = Rc::new(LocalDispatcher::new(format!("worker_{}", index)));
    let dispatcher: Rc<dyn Dispatcher> = local.clone();
    let mut quic_infos = PersistentQuicInfoCache::new(Rc::clone(&dispatcher));
    let rtt_cache = RttCache::new();

    quic_infos
        .get_or_create(&config.cluster)
        .with_context(|| format!("Invalid cluster '{}'", config.cluster.name))?;

    let outcome = match (&config.upstream, &shared.crypto) {
        (Some(upstream), Some(crypto)) => runtime.block_on(async {
            let socket = bind_socket(upstream.addr).await?;
            let local_addr = Address::from(
                socket
                    .local_addr()
                    .context("Failed to read local socket address")?,
            );
            let info = quic_infos
                .get(&config.cluster.name)
                .context("Persistent QUIC info missing from cache")?;

            let conn = create_quic_network_connection(
                info,
                Arc::clone(crypto),
                ServerId::new(upstream.host.clone(), upstream.addr.port()),
                &dispatcher,
                &Address::from(upstream.addr),
                Some(&local_addr),
                &shared.stat_names,
                Some(&rtt_cache),
                &shared.scope,
            )
            .context("Failed to create upstream QUIC connection")?;

            let outcome = drive_handshake(&local, &conn, &socket, upstream).await?;
            conn.record_rtt(&rtt_cache);
            conn.close(PROBE_CLOSE_CODE, "probe complete");
            flush(&local, &conn, &socket).await?;
            Ok::<_, anyhow::Error>(outcome)
        })?,
        (Some(_), None) => {
            warn!(worker = index, "Upstream configured without crypto; skipping probe");
            ProbeOutcome::Skipped
        }
        (None, _) => ProbeOutcome::Skipped,
    };

    info!(
        worker = index,
        dispatcher = %local.id(),
        cluster = %config.cluster.name,
        outcome = %outcome,
        "Worker finished"
    );

    Ok(WorkerReport {
        worker: index,
        dispatcher: local.name().to_string(),
        outcome,
    })
}

async fn bind_socket(upstream: SocketAddr) -> Result<UdpSocket> {
    let bind_addr: SocketAddr = if upstream.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind UDP socket on {}", bind_addr))
}

/// Send everything the connection has queued.
async fn flush(
    local: &LocalDispatcher,
    conn: &QuicClientConnection,
    socket: &UdpSocket,
) -> Result<()> {
    while let Some(transmit) = conn.poll_transmit(local.now()) {
        for datagram in transmit.datagrams() {
            socket
                .send_to(datagram, transmit.destination)
                .await
                .with_context(|| format!("Failed to send to {}", transmit.destination))?;
        }
    }
    Ok(())
}

/// Run the dispatcher loop until the handshake completes, fails, or the
/// probe timeout passes.
async fn drive_handshake(
    local: &LocalDispatcher,
    conn: &QuicClientConnection,
    socket: &UdpSocket,
    upstream: &UpstreamConfig,
) -> Result<ProbeOutcome> {
    let deadline = Instant::now() + upstream.probe_timeout;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        flush(local, conn, socket).await?;

        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::Connected => {
                    return Ok(ProbeOutcome::Connected { rtt: conn.rtt() });
                }
                ConnectionEvent::ConnectionLost { reason } => {
                    return Ok(ProbeOutcome::Failed {
                        reason: reason.to_string(),
                    });
                }
                _ => {}
            }
        }

        if Instant::now() >= deadline {
            return Ok(ProbeOutcome::TimedOut);
        }

        let wake = local
            .next_deadline()
            .map_or(deadline, |next| next.min(deadline));

        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received.context("UDP receive failed")?;
                debug!(bytes = len, from = %from, "Datagram received");
                conn.handle_datagram(local.now(), from, BytesMut::from(&buf[..len]));
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                local.fire_expired(local.now());
            }
        }
    }
}
