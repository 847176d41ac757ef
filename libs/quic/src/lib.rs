//! Upstream QUIC connection factory for the edge proxy.
//!
//! Each worker thread owns a dispatcher and, per upstream cluster, a
//! [`PersistentQuicInfo`]: connection helper, alarm factory, and engine
//! configuration built once and reused by every connection to that cluster.
//! [`create_quic_network_connection`] combines it with shared
//! [`CryptoConfig`] and per-call parameters to start a client connection.
//!
//! Thread affinity is structural. Everything bound to a dispatcher holds
//! `Rc` handles and is `!Send`; shared material (`CryptoConfig`, `StatsScope`)
//! travels in `Arc`.
//!
//! The QUIC engine is `quinn-proto`, which performs no I/O. The caller owns
//! the socket and moves datagrams in and out of each connection.

pub mod alarm;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod helper;
pub mod persistent_info;
pub mod rtt_cache;
pub mod server_id;
pub mod stats;

pub use alarm::{QuicAlarm, QuicAlarmFactory};
pub use cache::PersistentQuicInfoCache;
pub use cluster::ClusterInfo;
pub use config::{QuicProtocolConfig, QuicProtocolOptions};
pub use connection::{QuicClientConnection, Transmit};
pub use crypto::CryptoConfig;
pub use dispatcher::{
    Dispatcher, DispatcherId, LocalDispatcher, ManualTimeSource, RealTimeSource, TimeSource,
    TimerCallback, TimerId,
};
pub use error::{ConfigError, FactoryError};
pub use factory::create_quic_network_connection;
pub use helper::QuicConnectionHelper;
pub use persistent_info::{
    create_persistent_quic_info_for_cluster, CryptoClientStreamFactory, PersistentQuicInfo,
};
pub use rtt_cache::RttCache;
pub use server_id::ServerId;
pub use stats::{Counter, QuicStatNames, StatsScope};

/// Re-exported engine event type returned by [`QuicClientConnection::poll_event`].
pub use quinn_proto::Event as ConnectionEvent;
