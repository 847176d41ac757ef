//! Shared TLS material for upstream QUIC handshakes.
//!
//! A [`CryptoConfig`] is immutable once built and is shared through `Arc`
//! across worker threads. Everything thread-affine lives in
//! [`PersistentQuicInfo`](crate::PersistentQuicInfo) instead.
//!
//! Each config carries two variants of the same TLS settings. The private
//! one has no session store and never sends early data, so handshakes made
//! with it cannot be linked to earlier connections.

use std::fmt;
use std::sync::Arc;

use quinn_proto::crypto::rustls::QuicClientConfig;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::Resumption;
use rustls::RootCertStore;

use crate::error::ConfigError;

/// Immutable client-side crypto configuration.
#[derive(Clone)]
pub struct CryptoConfig {
    tls: Arc<rustls::ClientConfig>,
    quic: Arc<dyn quinn_proto::crypto::ClientConfig>,
    private_tls: Arc<rustls::ClientConfig>,
    private_quic: Arc<dyn quinn_proto::crypto::ClientConfig>,
}

impl CryptoConfig {
    /// Wrap an existing rustls configuration.
    ///
    /// The configuration must enable TLS 1.3 and offer a QUIC-capable initial
    /// cipher suite.
    pub fn from_rustls(tls: Arc<rustls::ClientConfig>) -> Result<Self, ConfigError> {
        let mut private = (*tls).clone();
        private.resumption = Resumption::disabled();
        private.enable_early_data = false;
        let private_tls = Arc::new(private);

        Ok(Self {
            quic: quic_config(&tls)?,
            tls,
            private_quic: quic_config(&private_tls)?,
            private_tls,
        })
    }

    /// Verify servers against a root store.
    pub fn with_root_certificates(
        roots: RootCertStore,
        alpn: &[&str],
    ) -> Result<Self, ConfigError> {
        let mut tls = tls13_builder()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        configure(&mut tls, alpn);
        Self::from_rustls(Arc::new(tls))
    }

    /// Verify servers with an externally supplied verifier.
    pub fn with_verifier(
        verifier: Arc<dyn ServerCertVerifier>,
        alpn: &[&str],
    ) -> Result<Self, ConfigError> {
        let mut tls = tls13_builder()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        configure(&mut tls, alpn);
        Self::from_rustls(Arc::new(tls))
    }

    /// The underlying rustls configuration.
    pub fn tls(&self) -> &Arc<rustls::ClientConfig> {
        &self.tls
    }

    /// ALPN protocols offered during the handshake.
    pub fn alpn_protocols(&self) -> Vec<String> {
        self.tls
            .alpn_protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// The rustls configuration used for servers in privacy mode: no session
    /// resumption, no early data.
    pub fn private_tls(&self) -> &Arc<rustls::ClientConfig> {
        &self.private_tls
    }

    pub(crate) fn quic(&self, privacy_mode: bool) -> Arc<dyn quinn_proto::crypto::ClientConfig> {
        if privacy_mode {
            Arc::clone(&self.private_quic)
        } else {
            Arc::clone(&self.quic)
        }
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("alpn_protocols", &self.alpn_protocols())
            .field("early_data", &self.tls.enable_early_data)
            .finish_non_exhaustive()
    }
}

fn quic_config(
    tls: &Arc<rustls::ClientConfig>,
) -> Result<Arc<dyn quinn_proto::crypto::ClientConfig>, ConfigError> {
    let quic = QuicClientConfig::try_from(Arc::clone(tls))
        .map_err(|e| ConfigError::InvalidCrypto(e.to_string()))?;
    Ok(Arc::new(quic))
}

fn tls13_builder(
) -> Result<rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier>, ConfigError> {
    rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| ConfigError::InvalidCrypto(e.to_string()))
}

fn configure(tls: &mut rustls::ClientConfig, alpn: &[&str]) {
    tls.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    tls.enable_early_data = true;
}
