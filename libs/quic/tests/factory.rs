//! Connection factory behavior on a single worker dispatcher.

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use edgeplane_networking::Address;
use edgeplane_quic::config::DEFAULT_INITIAL_RTT;
use edgeplane_quic::{
    create_persistent_quic_info_for_cluster, create_quic_network_connection, ClusterInfo,
    CryptoConfig, Dispatcher, FactoryError, LocalDispatcher, ManualTimeSource,
    PersistentQuicInfo, QuicClientConnection, QuicStatNames, RttCache, ServerId, StatsScope,
    TimeSource,
};
use rstest::{fixture, rstest};
use rustls::RootCertStore;

const UPSTREAM: &str = "127.0.0.1:4433";
const UPSTREAM_HOST: &str = "backend.internal";

struct Worker {
    clock: Rc<ManualTimeSource>,
    local: Rc<LocalDispatcher>,
    dispatcher: Rc<dyn Dispatcher>,
    info: PersistentQuicInfo,
    crypto: Arc<CryptoConfig>,
    stat_names: QuicStatNames,
    scope: Arc<StatsScope>,
}

impl Worker {
    fn connect(&self, server_id: ServerId) -> Result<QuicClientConnection, FactoryError> {
        self.connect_to(server_id, &UPSTREAM.parse().unwrap(), None)
    }

    fn connect_to(
        &self,
        server_id: ServerId,
        server_addr: &Address,
        rtt_cache: Option<&RttCache>,
    ) -> Result<QuicClientConnection, FactoryError> {
        create_quic_network_connection(
            &self.info,
            Arc::clone(&self.crypto),
            server_id,
            &self.dispatcher,
            server_addr,
            None,
            &self.stat_names,
            rtt_cache,
            &self.scope,
        )
    }
}

fn server() -> ServerId {
    ServerId::new(UPSTREAM_HOST, 4433)
}

#[fixture]
fn worker() -> Worker {
    let clock = Rc::new(ManualTimeSource::new());
    let local = Rc::new(LocalDispatcher::with_time_source("worker_0", clock.clone()));
    let dispatcher: Rc<dyn Dispatcher> = local.clone();
    let info =
        create_persistent_quic_info_for_cluster(&dispatcher, &ClusterInfo::new("backend")).unwrap();
    let crypto =
        Arc::new(CryptoConfig::with_root_certificates(RootCertStore::empty(), &["h3"]).unwrap());

    Worker {
        clock,
        local,
        dispatcher,
        info,
        crypto,
        stat_names: QuicStatNames::new(),
        scope: Arc::new(StatsScope::new("cluster.backend")),
    }
}

#[rstest]
fn connection_starts_handshake(worker: Worker) {
    let conn = worker.connect(server()).unwrap();

    assert!(conn.is_handshaking());
    assert!(!conn.is_closed());
    assert_eq!(conn.remote_address(), UPSTREAM.parse::<SocketAddr>().unwrap());
    assert_eq!(conn.server_id(), &server());
    assert!(Arc::ptr_eq(conn.crypto_config(), &worker.crypto));
    assert_eq!(
        worker
            .scope
            .counter_value(&worker.stat_names.connection_created),
        1
    );

    let transmit = conn.poll_transmit(worker.clock.now()).unwrap();
    assert_eq!(transmit.destination, UPSTREAM.parse::<SocketAddr>().unwrap());
    assert!(transmit.datagrams().all(|datagram| datagram.len() >= 1200));
}

#[rstest]
fn protocol_timer_lives_on_dispatcher(worker: Worker) {
    let conn = worker.connect(server()).unwrap();
    conn.poll_transmit(worker.clock.now()).unwrap();

    let deadline = conn.next_timeout().unwrap();
    assert_eq!(worker.local.next_deadline(), Some(deadline));
    assert_eq!(worker.local.pending_timers(), 1);

    drop(conn);
    assert_eq!(worker.local.pending_timers(), 0);
}

#[rstest]
fn expired_timer_triggers_retransmission(worker: Worker) {
    let conn = worker.connect(server()).unwrap();
    while conn.poll_transmit(worker.clock.now()).is_some() {}

    let deadline = conn.next_timeout().unwrap();
    worker.clock.set(deadline);
    assert_eq!(worker.local.fire_expired(worker.clock.now()), 1);

    assert!(conn.poll_transmit(worker.clock.now()).is_some());
    assert!(conn.next_timeout().is_some());
}

#[rstest]
fn connections_are_independent(worker: Worker) {
    let other = ServerId::new("other.internal", 4433);
    let first = worker.connect(server()).unwrap();
    let second = worker.connect(other.clone()).unwrap();

    assert_eq!(first.server_id(), &server());
    assert_eq!(second.server_id(), &other);

    let first_initial = first.poll_transmit(worker.clock.now()).unwrap();
    let second_initial = second.poll_transmit(worker.clock.now()).unwrap();
    assert_ne!(first_initial.payload, second_initial.payload);
    assert_eq!(worker.local.pending_timers(), 2);
    assert!(first.next_timeout().is_some());
    assert!(second.next_timeout().is_some());

    first.close(0, "done");
    assert!(first.is_closed());
    assert!(!second.is_closed());

    drop(first);
    assert!(second.is_handshaking());
    assert_eq!(worker.local.pending_timers(), 1);
    assert_eq!(worker.local.next_deadline(), second.next_timeout());
}

#[rstest]
fn close_counts_once(worker: Worker) {
    let conn = worker.connect(server()).unwrap();

    conn.close(0x10, "shutdown");
    conn.close(0x10, "shutdown");

    assert!(conn.is_closed());
    assert_eq!(
        worker
            .scope
            .counter_value(&worker.stat_names.connection_closed),
        1
    );
}

#[rstest]
fn cached_rtt_seeds_new_connection(worker: Worker) {
    let cache = RttCache::new();
    cache.set_srtt(&server(), Duration::from_millis(50));

    let conn = worker
        .connect_to(server(), &UPSTREAM.parse().unwrap(), Some(&cache))
        .unwrap();
    assert_eq!(conn.rtt(), Duration::from_millis(50));
    assert_eq!(
        worker.scope.counter_value(&worker.stat_names.rtt_cache_hit),
        1
    );

    let other = ServerId::new("other.internal", 4433);
    let conn = worker
        .connect_to(other, &UPSTREAM.parse().unwrap(), Some(&cache))
        .unwrap();
    assert_eq!(conn.rtt(), DEFAULT_INITIAL_RTT);
    assert_eq!(
        worker.scope.counter_value(&worker.stat_names.rtt_cache_miss),
        1
    );
}

#[rstest]
fn privacy_mode_skips_rtt_cache(worker: Worker) {
    let cache = RttCache::new();
    cache.set_srtt(&server(), Duration::from_millis(50));

    let conn = worker
        .connect_to(
            server().with_privacy_mode(),
            &UPSTREAM.parse().unwrap(),
            Some(&cache),
        )
        .unwrap();
    assert_eq!(conn.rtt(), DEFAULT_INITIAL_RTT);
    assert_eq!(
        worker.scope.counter_value(&worker.stat_names.rtt_cache_hit),
        0
    );

    conn.record_rtt(&cache);
    assert_eq!(cache.get_srtt(&server()), Some(Duration::from_millis(50)));
}

#[rstest]
fn record_rtt_waits_for_handshake(worker: Worker) {
    let cache = RttCache::new();
    let conn = worker.connect(server()).unwrap();

    conn.record_rtt(&cache);
    assert!(cache.is_empty());
}

#[rstest]
fn failed_connect_leaves_info_usable(worker: Worker) {
    let err = worker
        .connect_to(server(), &"127.0.0.1:0".parse().unwrap(), None)
        .unwrap_err();
    assert!(matches!(err, FactoryError::Connect(_)));
    assert!(!err.is_contract_violation());

    assert!(worker.connect(server()).is_ok());
    assert_eq!(
        worker
            .scope
            .counter_value(&worker.stat_names.connection_created),
        1
    );
}

#[rstest]
fn non_ip_server_address_rejected(worker: Worker) {
    let err = worker
        .connect_to(server(), &"unix:/run/upstream.sock".parse().unwrap(), None)
        .unwrap_err();

    match err {
        FactoryError::UnresolvedAddress { role, address } => {
            assert_eq!(role, "server");
            assert_eq!(address, "unix:/run/upstream.sock");
        }
        other => panic!("Expected UnresolvedAddress, got {:?}", other),
    }
}

#[rstest]
fn local_address_recorded(worker: Worker) {
    let local: Address = "127.0.0.1:40000".parse().unwrap();
    let conn = create_quic_network_connection(
        &worker.info,
        Arc::clone(&worker.crypto),
        server(),
        &worker.dispatcher,
        &UPSTREAM.parse().unwrap(),
        Some(&local),
        &worker.stat_names,
        None,
        &worker.scope,
    )
    .unwrap();

    assert_eq!(conn.local_address(), Some(&local));
}

#[rstest]
fn infos_for_different_dispatchers_are_independent(worker: Worker) {
    let other: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_1"));
    let other_info =
        create_persistent_quic_info_for_cluster(&other, &ClusterInfo::new("backend")).unwrap();

    assert_ne!(other_info.dispatcher().id(), worker.info.dispatcher().id());
    assert!(!Arc::ptr_eq(
        other_info.endpoint_config(),
        worker.info.endpoint_config()
    ));
    assert!(!Arc::ptr_eq(
        other_info.transport_config(),
        worker.info.transport_config()
    ));
}

#[cfg(debug_assertions)]
#[rstest]
#[should_panic(expected = "different dispatcher")]
fn dispatcher_mismatch_panics_in_debug(worker: Worker) {
    let other: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_1"));
    let _ = create_quic_network_connection(
        &worker.info,
        Arc::clone(&worker.crypto),
        server(),
        &other,
        &UPSTREAM.parse().unwrap(),
        None,
        &worker.stat_names,
        None,
        &worker.scope,
    );
}

#[cfg(not(debug_assertions))]
#[rstest]
fn dispatcher_mismatch_is_an_error_in_release(worker: Worker) {
    let other: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_1"));
    let err = create_quic_network_connection(
        &worker.info,
        Arc::clone(&worker.crypto),
        server(),
        &other,
        &UPSTREAM.parse().unwrap(),
        None,
        &worker.stat_names,
        None,
        &worker.scope,
    )
    .unwrap_err();

    assert!(err.is_contract_violation());
}
