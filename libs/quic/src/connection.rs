//! A client QUIC connection driven by its owning dispatcher.
//!
//! The engine is sans-IO: the owner feeds received datagrams in with
//! [`QuicClientConnection::handle_datagram`] and drains outgoing ones with
//! [`QuicClientConnection::poll_transmit`]. Protocol timers are mirrored onto
//! the dispatcher through a [`QuicAlarm`], so expiries are processed when the
//! dispatcher fires them.
//!
//! A connection is `!Send`. Dropping it cancels its timers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use edgeplane_networking::Address;
use quinn_proto::{ConnectionHandle, DatagramEvent, Endpoint, Event, VarInt};
use tracing::{debug, trace};

use crate::alarm::{QuicAlarm, QuicAlarmFactory};
use crate::crypto::CryptoConfig;
use crate::dispatcher::{Dispatcher, TimerCallback};
use crate::rtt_cache::RttCache;
use crate::server_id::ServerId;
use crate::stats::Counter;

/// Upper bound on datagrams coalesced into one [`Transmit`].
pub const MAX_TRANSMIT_BATCH: usize = 10;

/// Size of one outgoing datagram when sizing batches.
pub(crate) const BATCH_DATAGRAM_SIZE: usize = 1500;

/// Datagrams per transmit allowed by a send buffer limit of `limit` bytes.
pub(crate) fn transmit_batch(limit: usize) -> usize {
    (limit / BATCH_DATAGRAM_SIZE).clamp(1, MAX_TRANSMIT_BATCH)
}

/// Outgoing UDP payload produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub destination: SocketAddr,
    pub payload: Bytes,
    /// Set when `payload` holds several datagrams of this size (the last may
    /// be shorter).
    pub segment_size: Option<usize>,
}

impl Transmit {
    /// Individual datagrams in this transmit.
    pub fn datagrams(&self) -> impl Iterator<Item = &[u8]> {
        let size = self.segment_size.unwrap_or(self.payload.len()).max(1);
        self.payload.chunks(size)
    }
}

/// Engine state touched by I/O and timer processing.
struct EngineState {
    endpoint: Endpoint,
    handle: ConnectionHandle,
    connection: quinn_proto::Connection,
    send_buffer: Vec<u8>,
    max_datagrams: usize,
    /// Stateless responses generated by the endpoint.
    responses: VecDeque<Transmit>,
}

impl EngineState {
    fn process_endpoint_events(&mut self) {
        while let Some(event) = self.connection.poll_endpoint_events() {
            if let Some(event) = self.endpoint.handle_event(self.handle, event) {
                self.connection.handle_event(event);
            }
        }
    }
}

struct Inner {
    engine: RefCell<EngineState>,
    alarm: QuicAlarm,
}

impl Inner {
    /// Mirror the engine's next timeout onto the dispatcher.
    fn rearm(&self) {
        let next = self.engine.borrow_mut().connection.poll_timeout();
        self.alarm.update(next);
    }
}

impl TimerCallback for Inner {
    fn on_timer(&self, now: Instant) {
        self.alarm.on_fired();
        {
            let mut engine = self.engine.borrow_mut();
            engine.connection.handle_timeout(now);
            engine.process_endpoint_events();
        }
        self.rearm();
    }
}

/// Pieces assembled by the connection factory.
pub(crate) struct ConnectionParts {
    pub endpoint: Endpoint,
    pub handle: ConnectionHandle,
    pub connection: quinn_proto::Connection,
    pub send_buffer: Vec<u8>,
    pub send_buffer_limit: usize,
    pub server_id: ServerId,
    pub remote_address: SocketAddr,
    pub local_address: Option<Address>,
    pub crypto_config: Arc<CryptoConfig>,
    pub closed_counter: Counter,
}

/// An upstream QUIC connection owned by one worker thread.
pub struct QuicClientConnection {
    inner: Rc<Inner>,
    dispatcher: Rc<dyn Dispatcher>,
    server_id: ServerId,
    remote_address: SocketAddr,
    local_address: Option<Address>,
    crypto_config: Arc<CryptoConfig>,
    closed_counter: Counter,
    send_buffer_limit: usize,
}

impl QuicClientConnection {
    pub(crate) fn new(parts: ConnectionParts, alarm_factory: &QuicAlarmFactory) -> Self {
        let send_buffer_limit = parts.send_buffer_limit;
        let max_datagrams = transmit_batch(send_buffer_limit);

        let engine = EngineState {
            endpoint: parts.endpoint,
            handle: parts.handle,
            connection: parts.connection,
            send_buffer: parts.send_buffer,
            max_datagrams,
            responses: VecDeque::new(),
        };
        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let delegate: Weak<dyn TimerCallback> = weak.clone();
            Inner {
                engine: RefCell::new(engine),
                alarm: alarm_factory.create_alarm(delegate),
            }
        });
        inner.rearm();

        Self {
            inner,
            dispatcher: Rc::clone(alarm_factory.dispatcher()),
            server_id: parts.server_id,
            remote_address: parts.remote_address,
            local_address: parts.local_address,
            crypto_config: parts.crypto_config,
            closed_counter: parts.closed_counter,
            send_buffer_limit,
        }
    }

    /// Next datagram (or batch of datagrams) to send, if any.
    pub fn poll_transmit(&self, now: Instant) -> Option<Transmit> {
        let transmit = {
            let mut engine = self.inner.engine.borrow_mut();
            let engine = &mut *engine;

            match engine.responses.pop_front() {
                Some(response) => Some(response),
                None => {
                    engine.send_buffer.clear();
                    let max_datagrams = engine.max_datagrams;
                    engine
                        .connection
                        .poll_transmit(now, max_datagrams, &mut engine.send_buffer)
                        .map(|transmit| Transmit {
                            destination: transmit.destination,
                            payload: Bytes::copy_from_slice(&engine.send_buffer[..transmit.size]),
                            segment_size: transmit.segment_size,
                        })
                }
            }
        };
        self.inner.rearm();

        if let Some(transmit) = &transmit {
            trace!(
                server = %self.server_id,
                bytes = transmit.payload.len(),
                "QUIC transmit ready"
            );
        }
        transmit
    }

    /// Feed a datagram received from the network.
    pub fn handle_datagram(&self, now: Instant, remote: SocketAddr, data: BytesMut) {
        {
            let mut engine = self.inner.engine.borrow_mut();
            let engine = &mut *engine;
            let mut response = Vec::new();

            match engine
                .endpoint
                .handle(now, remote, None, None, data, &mut response)
            {
                Some(DatagramEvent::ConnectionEvent(handle, event)) => {
                    if handle == engine.handle {
                        engine.connection.handle_event(event);
                    }
                }
                Some(DatagramEvent::NewConnection(incoming)) => {
                    debug!(remote = %remote, "Ignoring inbound connection attempt on client endpoint");
                    engine.endpoint.ignore(incoming);
                }
                Some(DatagramEvent::Response(transmit)) => {
                    engine.responses.push_back(Transmit {
                        destination: transmit.destination,
                        payload: Bytes::copy_from_slice(&response[..transmit.size]),
                        segment_size: transmit.segment_size,
                    });
                }
                None => {}
            }
            engine.process_endpoint_events();
        }
        self.inner.rearm();
    }

    /// Next application-visible event (handshake done, connection lost, ...).
    pub fn poll_event(&self) -> Option<Event> {
        self.inner.engine.borrow_mut().connection.poll()
    }

    /// Close the connection with an application error code.
    ///
    /// Closing an already closed connection does nothing.
    pub fn close(&self, error_code: u32, reason: &str) {
        if self.is_closed() {
            return;
        }

        let now = self.dispatcher.now();
        {
            let mut engine = self.inner.engine.borrow_mut();
            engine.connection.close(
                now,
                VarInt::from_u32(error_code),
                Bytes::copy_from_slice(reason.as_bytes()),
            );
            engine.process_endpoint_events();
        }
        self.inner.rearm();
        self.closed_counter.inc();

        debug!(server = %self.server_id, error_code, reason, "Closed upstream QUIC connection");
    }

    /// Remember this connection's smoothed RTT for later connections to the
    /// same server. Skipped in privacy mode or before the handshake completes.
    pub fn record_rtt(&self, cache: &RttCache) {
        if self.server_id.privacy_mode_enabled || self.is_handshaking() {
            return;
        }
        cache.set_srtt(&self.server_id, self.rtt());
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub fn local_address(&self) -> Option<&Address> {
        self.local_address.as_ref()
    }

    /// Crypto configuration snapshot the handshake was started with.
    pub fn crypto_config(&self) -> &Arc<CryptoConfig> {
        &self.crypto_config
    }

    /// Per-connection send buffer limit, in bytes.
    pub fn send_buffer_limit(&self) -> usize {
        self.send_buffer_limit
    }

    /// The dispatcher this connection runs on.
    pub fn dispatcher(&self) -> &Rc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn is_handshaking(&self) -> bool {
        self.inner.engine.borrow().connection.is_handshaking()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.engine.borrow().connection.is_closed()
    }

    /// Current smoothed RTT estimate.
    pub fn rtt(&self) -> Duration {
        self.inner.engine.borrow().connection.rtt()
    }

    /// Deadline of the armed protocol timer, if any.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.inner.alarm.deadline()
    }
}

impl std::fmt::Debug for QuicClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicClientConnection")
            .field("server_id", &self.server_id)
            .field("remote_address", &self.remote_address)
            .field("local_address", &self.local_address)
            .field("dispatcher", &self.dispatcher.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterInfo;
    use crate::dispatcher::LocalDispatcher;
    use crate::factory::create_quic_network_connection;
    use crate::persistent_info::create_persistent_quic_info_for_cluster;
    use crate::stats::{QuicStatNames, StatsScope};
    use rustls::RootCertStore;

    fn connect(buffer_limit: u32) -> QuicClientConnection {
        let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
        let mut cluster = ClusterInfo::new("backend");
        cluster.per_connection_buffer_limit_bytes = buffer_limit;
        let info = create_persistent_quic_info_for_cluster(&dispatcher, &cluster).unwrap();
        let crypto =
            Arc::new(CryptoConfig::with_root_certificates(RootCertStore::empty(), &["h3"]).unwrap());

        create_quic_network_connection(
            &info,
            crypto,
            ServerId::new("backend.internal", 4433),
            &dispatcher,
            &"127.0.0.1:4433".parse().unwrap(),
            None,
            &QuicStatNames::new(),
            None,
            &Arc::new(StatsScope::new("cluster.backend")),
        )
        .unwrap()
    }

    #[test]
    fn test_buffer_limit_caps_batch_not_reservation() {
        let conn = connect(crate::cluster::DEFAULT_BUFFER_LIMIT);
        let now = conn.dispatcher().now();
        while conn.poll_transmit(now).is_some() {}

        assert_eq!(conn.send_buffer_limit(), 1024 * 1024);
        let engine = conn.inner.engine.borrow();
        assert_eq!(engine.max_datagrams, MAX_TRANSMIT_BATCH);
        assert!(engine.send_buffer.capacity() < 64 * 1024);
    }

    #[test]
    fn test_small_buffer_limit_sends_single_datagrams() {
        let conn = connect(2048);
        assert_eq!(conn.send_buffer_limit(), 2048);
        assert_eq!(conn.inner.engine.borrow().max_datagrams, 1);
    }

    #[test]
    fn test_transmit_batch_bounds() {
        assert_eq!(transmit_batch(0), 1);
        assert_eq!(transmit_batch(3000), 2);
        assert_eq!(transmit_batch(1024 * 1024), MAX_TRANSMIT_BATCH);
    }

    #[test]
    fn test_transmit_datagrams_split_by_segment_size() {
        let transmit = Transmit {
            destination: "127.0.0.1:443".parse().unwrap(),
            payload: Bytes::from(vec![0u8; 2500]),
            segment_size: Some(1200),
        };
        let sizes: Vec<usize> = transmit.datagrams().map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![1200, 1200, 100]);
    }

    #[test]
    fn test_transmit_single_datagram() {
        let transmit = Transmit {
            destination: "127.0.0.1:443".parse().unwrap(),
            payload: Bytes::from_static(b"hello"),
            segment_size: None,
        };
        assert_eq!(transmit.datagrams().count(), 1);
    }
}
