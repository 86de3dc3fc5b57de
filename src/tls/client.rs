//! HTTPS client construction pinned to the broker CA.
//!
//! The factory owns the CA trust pool and hands out `reqwest` clients on top
//! of a hand-built `rustls::ClientConfig`:
//!
//! - [`TlsClientFactory::client`]: CA-validated TLS, no client certificate
//! - [`TlsClientFactory::mutual_client`]: mutual TLS; the session certificate
//!   is presented through a [`ResolvesClientCert`] callback whenever the
//!   server asks for one
//!
//! The platform trust store is never consulted: only the configured CA
//! bundle is trusted.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, SignatureScheme};
use tracing::debug;

use super::pem::{parse_certs, parse_private_key};
use crate::{Error, Result};

/// Upper bound for a single broker request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds HTTPS clients that trust only the broker CA.
#[derive(Debug, Clone)]
pub struct TlsClientFactory {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
    timeout: Duration,
}

impl TlsClientFactory {
    /// Load the CA bundle into a trust pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::UntrustedCa` if the PEM holds no certificate or a
    /// certificate cannot be added to the pool.
    pub fn new(ca_pem: &[u8]) -> Result<Self> {
        let ca_certs = parse_certs(ca_pem).map_err(|e| Error::UntrustedCa(e.to_string()))?;

        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots
                .add(cert)
                .map_err(|e| Error::UntrustedCa(format!("Failed to add CA cert to trust pool: {e}")))?;
        }

        debug!(ca_certs = roots.len(), "Broker trust pool loaded");

        Ok(Self {
            roots: Arc::new(roots),
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-request timeout applied to every client built here.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One-way TLS client (server authenticated against the CA only).
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS or HTTP client cannot be built.
    pub fn client(&self) -> Result<Client> {
        self.build(None)
    }

    /// Mutual TLS client presenting `cert_pem` / `key_pem` on request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` if the certificate or key cannot be
    /// decoded or the key type is unsupported.
    pub fn mutual_client(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Client> {
        let chain = parse_certs(cert_pem)?;
        let key_der = parse_private_key(key_pem)?;
        let signing_key = self
            .provider
            .key_provider
            .load_private_key(key_der)
            .map_err(|e| Error::Certificate(format!("Unsupported client key: {e}")))?;

        let resolver = SessionCertResolver {
            certified: Arc::new(CertifiedKey::new(chain, signing_key)),
        };
        self.build(Some(Arc::new(resolver)))
    }

    fn build(&self, resolver: Option<Arc<dyn ResolvesClientCert>>) -> Result<Client> {
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("TLS protocol setup failed: {e}")))?
            .with_root_certificates(Arc::clone(&self.roots));

        let tls = match resolver {
            Some(resolver) => builder.with_client_cert_resolver(resolver),
            None => builder.with_no_client_auth(),
        };

        Ok(Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(self.timeout)
            .build()?)
    }
}

/// Build an HTTPS client in one call.
///
/// Mutual TLS is used only when **both** `client_cert_pem` and
/// `client_key_pem` are supplied; otherwise the client does CA-validated TLS.
///
/// # Errors
///
/// Returns `Error::UntrustedCa` for an unusable CA bundle and
/// `Error::Certificate` for an unusable client certificate or key.
pub fn build_client(
    ca_pem: &[u8],
    client_cert_pem: Option<&[u8]>,
    client_key_pem: Option<&[u8]>,
) -> Result<Client> {
    let factory = TlsClientFactory::new(ca_pem)?;
    match (client_cert_pem, client_key_pem) {
        (Some(cert), Some(key)) => factory.mutual_client(cert, key),
        _ => factory.client(),
    }
}

/// Hands the login certificate to rustls whenever the server requests one.
#[derive(Debug)]
struct SessionCertResolver {
    certified: Arc<CertifiedKey>,
}

impl ResolvesClientCert for SessionCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.certified))
    }

    fn has_certs(&self) -> bool {
        true
    }
}
