//! Upstream QUIC connection creation.

use std::rc::Rc;
use std::sync::Arc;

use edgeplane_networking::Address;
use quinn_proto::Endpoint;
use tracing::{debug, warn};

use crate::connection::{ConnectionParts, QuicClientConnection};
use crate::crypto::CryptoConfig;
use crate::dispatcher::Dispatcher;
use crate::error::FactoryError;
use crate::persistent_info::PersistentQuicInfo;
use crate::rtt_cache::RttCache;
use crate::server_id::ServerId;
use crate::stats::{QuicStatNames, StatsScope};

/// Create a client QUIC connection to `server_addr` using the persistent
/// state of the calling thread.
///
/// The connection is returned before the handshake completes; its first
/// flight is ready through [`QuicClientConnection::poll_transmit`].
///
/// - `info` must have been built on `dispatcher`. A mismatch panics in debug
///   builds and is reported as [`FactoryError::DispatcherMismatch`] otherwise.
/// - `rtt_cache`, when given and the server is not in privacy mode, seeds the
///   initial RTT with the last smoothed RTT to the same server.
/// - A failure here leaves `info` usable for later calls.
#[allow(clippy::too_many_arguments)]
pub fn create_quic_network_connection(
    info: &PersistentQuicInfo,
    crypto_config: Arc<CryptoConfig>,
    server_id: ServerId,
    dispatcher: &Rc<dyn Dispatcher>,
    server_addr: &Address,
    local_addr: Option<&Address>,
    stat_names: &QuicStatNames,
    rtt_cache: Option<&RttCache>,
    scope: &Arc<StatsScope>,
) -> Result<QuicClientConnection, FactoryError> {
    let expected = info.dispatcher().id();
    let actual = dispatcher.id();
    debug_assert_eq!(
        expected, actual,
        "persistent QUIC info used from a different dispatcher"
    );
    if expected != actual {
        warn!(%expected, %actual, cluster = info.cluster_name(), "Dispatcher mismatch");
        return Err(FactoryError::DispatcherMismatch { expected, actual });
    }

    let remote = server_addr
        .socket_addr()
        .ok_or_else(|| FactoryError::UnresolvedAddress {
            role: "server",
            address: server_addr.to_string(),
        })?;
    if let Some(local) = local_addr {
        if !local.is_ip() {
            return Err(FactoryError::UnresolvedAddress {
                role: "local",
                address: local.to_string(),
            });
        }
    }

    let cached_rtt = match rtt_cache {
        Some(cache) if !server_id.privacy_mode_enabled => {
            let srtt = cache.get_srtt(&server_id);
            let stat = if srtt.is_some() {
                &stat_names.rtt_cache_hit
            } else {
                &stat_names.rtt_cache_miss
            };
            scope.counter(stat).inc();
            srtt
        }
        _ => None,
    };

    let client_config = info
        .crypto_stream_factory()
        .client_config(&crypto_config, &server_id, info.transport_for(cached_rtt));

    let helper = info.conn_helper();
    let mut endpoint = Endpoint::new(
        Arc::clone(info.endpoint_config()),
        None,
        true,
        Some(helper.endpoint_seed()),
    );
    let (handle, connection) =
        endpoint.connect(helper.now(), client_config, remote, &server_id.host)?;

    let connection = QuicClientConnection::new(
        ConnectionParts {
            endpoint,
            handle,
            connection,
            send_buffer: helper.allocate_send_buffer(info.buffer_limit()),
            send_buffer_limit: info.buffer_limit() as usize,
            server_id,
            remote_address: remote,
            local_address: local_addr.cloned(),
            crypto_config,
            closed_counter: scope.counter(&stat_names.connection_closed),
        },
        info.alarm_factory(),
    );
    scope.counter(&stat_names.connection_created).inc();

    debug!(
        cluster = info.cluster_name(),
        server = %connection.server_id(),
        remote = %remote,
        initial_rtt_ms = cached_rtt.map(|rtt| rtt.as_millis() as u64),
        "Created upstream QUIC connection"
    );

    Ok(connection)
}
