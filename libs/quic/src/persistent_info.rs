//! Per-thread, per-cluster state reused by every upstream QUIC connection.
//!
//! A [`PersistentQuicInfo`] is built once per (worker thread, cluster). It
//! owns the connection helper, the alarm factory, and the engine
//! configuration derived from the cluster's QUIC options. It holds `Rc`
//! handles to its dispatcher, so the compiler keeps it on the thread that
//! built it:
//!
//! ```compile_fail
//! use std::rc::Rc;
//! use edgeplane_quic::{create_persistent_quic_info_for_cluster, ClusterInfo, Dispatcher, LocalDispatcher};
//!
//! let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
//! let info = create_persistent_quic_info_for_cluster(&dispatcher, &ClusterInfo::new("backend")).unwrap();
//! std::thread::spawn(move || drop(info));
//! ```

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use quinn_proto::{ClientConfig, EndpointConfig, TransportConfig};
use tracing::debug;

use crate::alarm::QuicAlarmFactory;
use crate::cluster::ClusterInfo;
use crate::config::QuicProtocolConfig;
use crate::crypto::CryptoConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;
use crate::helper::QuicConnectionHelper;
use crate::server_id::ServerId;

/// Builds the handshake configuration for each new connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct CryptoClientStreamFactory;

impl CryptoClientStreamFactory {
    /// The rustls configuration a handshake to `server_id` uses.
    pub fn tls_for<'a>(
        &self,
        crypto: &'a CryptoConfig,
        server_id: &ServerId,
    ) -> &'a Arc<rustls::ClientConfig> {
        if server_id.privacy_mode_enabled {
            crypto.private_tls()
        } else {
            crypto.tls()
        }
    }

    /// Engine client configuration for one handshake to `server_id`.
    pub fn client_config(
        &self,
        crypto: &CryptoConfig,
        server_id: &ServerId,
        transport: Arc<TransportConfig>,
    ) -> ClientConfig {
        let mut config = ClientConfig::new(crypto.quic(server_id.privacy_mode_enabled));
        config.transport_config(transport);
        config
    }
}

/// Thread-affine state shared by connections to one cluster.
pub struct PersistentQuicInfo {
    cluster_name: String,
    dispatcher: Rc<dyn Dispatcher>,
    conn_helper: QuicConnectionHelper,
    alarm_factory: QuicAlarmFactory,
    quic_config: QuicProtocolConfig,
    transport_config: Arc<TransportConfig>,
    endpoint_config: Arc<EndpointConfig>,
    buffer_limit: u32,
    crypto_stream_factory: CryptoClientStreamFactory,
}

impl PersistentQuicInfo {
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// The dispatcher this info is bound to.
    pub fn dispatcher(&self) -> &Rc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn conn_helper(&self) -> &QuicConnectionHelper {
        &self.conn_helper
    }

    pub fn alarm_factory(&self) -> &QuicAlarmFactory {
        &self.alarm_factory
    }

    /// Validated protocol options.
    pub fn quic_config(&self) -> &QuicProtocolConfig {
        &self.quic_config
    }

    /// Transport parameters used when no cached RTT applies.
    pub fn transport_config(&self) -> &Arc<TransportConfig> {
        &self.transport_config
    }

    pub fn endpoint_config(&self) -> &Arc<EndpointConfig> {
        &self.endpoint_config
    }

    /// Per-connection send buffer limit, in bytes.
    pub fn buffer_limit(&self) -> u32 {
        self.buffer_limit
    }

    pub fn crypto_stream_factory(&self) -> &CryptoClientStreamFactory {
        &self.crypto_stream_factory
    }

    /// Transport parameters for a connection, seeded with `initial_rtt` when
    /// one is known.
    pub(crate) fn transport_for(&self, initial_rtt: Option<Duration>) -> Arc<TransportConfig> {
        match initial_rtt {
            Some(rtt) => Arc::new(self.quic_config.transport_config(Some(rtt))),
            None => Arc::clone(&self.transport_config),
        }
    }
}

impl std::fmt::Debug for PersistentQuicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentQuicInfo")
            .field("cluster_name", &self.cluster_name)
            .field("dispatcher", &self.dispatcher.id())
            .field("quic_config", &self.quic_config)
            .field("buffer_limit", &self.buffer_limit)
            .finish_non_exhaustive()
    }
}

/// Build persistent QUIC state for `cluster` on `dispatcher`.
///
/// Fails without side effects if the cluster descriptor is invalid.
pub fn create_persistent_quic_info_for_cluster(
    dispatcher: &Rc<dyn Dispatcher>,
    cluster: &ClusterInfo,
) -> Result<PersistentQuicInfo, ConfigError> {
    let quic_config = cluster.validate()?;
    let transport_config = Arc::new(quic_config.transport_config(None));

    debug!(
        cluster = %cluster.name,
        dispatcher = %dispatcher.id(),
        buffer_limit = cluster.per_connection_buffer_limit_bytes,
        idle_timeout_secs = quic_config.idle_timeout().as_secs(),
        "Created persistent QUIC info"
    );

    Ok(PersistentQuicInfo {
        cluster_name: cluster.name.clone(),
        dispatcher: Rc::clone(dispatcher),
        conn_helper: QuicConnectionHelper::new(Rc::clone(dispatcher)),
        alarm_factory: QuicAlarmFactory::new(Rc::clone(dispatcher)),
        quic_config,
        transport_config,
        endpoint_config: Arc::new(EndpointConfig::default()),
        buffer_limit: cluster.per_connection_buffer_limit_bytes,
        crypto_stream_factory: CryptoClientStreamFactory,
    })
}
