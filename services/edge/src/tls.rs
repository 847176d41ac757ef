//! Client TLS material for upstream probes.

use std::path::Path;

use anyhow::{Context, Result};
use edgeplane_quic::CryptoConfig;
use rustls::RootCertStore;

use crate::config::UpstreamConfig;

/// Build the crypto configuration for `upstream`.
///
/// Without a CA file the root store is empty and every server certificate is
/// rejected, so the probe reports the handshake failure.
pub fn build_crypto(upstream: &UpstreamConfig) -> Result<CryptoConfig> {
    let roots = match &upstream.ca_file {
        Some(path) => load_roots(path)?,
        None => RootCertStore::empty(),
    };
    let alpn: Vec<&str> = upstream.alpn.iter().map(String::as_str).collect();

    CryptoConfig::with_root_certificates(roots, &alpn).context("Invalid upstream TLS configuration")
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let pem = std::fs::read(path)
        .with_context(|| format!("Failed to read CA file {}", path.display()))?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.with_context(|| format!("Invalid certificate in {}", path.display()))?;
        roots
            .add(cert)
            .with_context(|| format!("Rejected CA certificate from {}", path.display()))?;
    }

    if roots.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }
    Ok(roots)
}
