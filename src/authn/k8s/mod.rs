//! Certificate-based authentication for cluster workloads
//!
//! Two-phase protocol:
//!
//! 1. **Login**: send a CSR for the session key to `inject_client_cert`;
//!    the broker signs it and drops the certificate into the pod.
//! 2. **Authenticate**: present that certificate over mutual TLS and
//!    receive the access token.
//!
//! ```text
//! NoCertificate ──login──▶ LoggedIn ──authenticate──▶ token stored
//!       ▲                      │
//!       └──── expired / cert_expired ────┘
//! ```

mod csr;
mod waiter;

pub use csr::{SessionKey, spiffe_id};
pub use waiter::{CertificateWaiter, FileCertificateWaiter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::response::{self, authenticate_url, login_url};
use super::{Authenticator, AuthnType};
use crate::access_token::AccessTokenStore;
use crate::config::{BrokerVersion, Config};
use crate::tls::{ClientCertificate, TlsClientFactory};
use crate::username::Username;
use crate::{Error, Result};

/// Header carrying the identity prefix on login.
pub const HOST_ID_PREFIX_HEADER: &str = "Host-Id-Prefix";

// ── Configuration ──────────────────────────────────────────────────────────

/// Settings for the certificate strategy.
#[derive(Debug, Clone)]
pub struct K8sConfig {
    /// Authenticator base URL
    pub authn_url: String,
    /// Broker account
    pub account: String,
    /// Host identity
    pub username: Username,
    /// Broker CA bundle, PEM
    pub ca_cert: Vec<u8>,
    /// Pod name for the CSR SAN
    pub pod_name: String,
    /// Pod namespace for the CSR SAN
    pub pod_namespace: String,
    /// Where the broker delivers the signed certificate
    pub client_cert_path: PathBuf,
    /// Certificate lookups after login
    pub client_cert_retry_count_limit: u32,
    /// Pause between certificate lookups
    pub client_cert_poll_interval: Duration,
    /// Re-login this long before the certificate expires
    pub cert_expiry_buffer: Duration,
    /// Broker API version
    pub version: BrokerVersion,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl K8sConfig {
    /// Derive and validate the strategy settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` when no valid host identity is
    /// configured and `Error::Config` for missing broker or pod settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        let login = config.login().ok_or_else(|| {
            Error::invalid_identity("", "a host identity is required for certificate authentication")
        })?;
        let username = Username::parse(login)?;

        Ok(Self {
            authn_url: config.authn_base_url()?,
            account: config.require_account()?.to_string(),
            username,
            ca_cert: config.ca_certificate()?,
            pod_name: required(config.pod_name.as_deref(), "pod_name")?,
            pod_namespace: required(config.pod_namespace.as_deref(), "pod_namespace")?,
            client_cert_path: config.client_cert_path.clone(),
            client_cert_retry_count_limit: config.client_cert_retry_count_limit,
            client_cert_poll_interval: config.client_cert_poll_interval,
            cert_expiry_buffer: config.cert_expiry_buffer,
            version: config.version,
            request_timeout: config.request_timeout,
        })
    }
}

fn required(value: Option<&str>, name: &str) -> Result<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("{name} is required for certificate authentication")))
}

// ── State machine ──────────────────────────────────────────────────────────

enum CertState {
    NoCertificate,
    LoggedIn {
        cert: ClientCertificate,
        client: Client,
    },
}

/// Certificate strategy authenticator.
pub struct K8sAuthenticator {
    config: K8sConfig,
    factory: TlsClientFactory,
    key: SessionKey,
    waiter: Arc<dyn CertificateWaiter>,
    state: CertState,
    access_token: Arc<dyn AccessTokenStore>,
}

impl K8sAuthenticator {
    /// Create an authenticator with a fresh session key and the polling
    /// certificate waiter.
    ///
    /// # Errors
    ///
    /// Returns `Error::UntrustedCa` for an unusable CA bundle and
    /// `Error::Certificate` if key generation fails.
    pub fn new(config: K8sConfig, access_token: Arc<dyn AccessTokenStore>) -> Result<Self> {
        let waiter = Arc::new(FileCertificateWaiter::new(
            config.client_cert_retry_count_limit,
            config.client_cert_poll_interval,
        ));
        Self::with_waiter(config, access_token, waiter)
    }

    /// Create an authenticator with a custom certificate waiter.
    ///
    /// # Errors
    ///
    /// See [`K8sAuthenticator::new`].
    pub fn with_waiter(
        config: K8sConfig,
        access_token: Arc<dyn AccessTokenStore>,
        waiter: Arc<dyn CertificateWaiter>,
    ) -> Result<Self> {
        let factory = TlsClientFactory::new(&config.ca_cert)?.with_timeout(config.request_timeout);
        let key = SessionKey::generate()?;

        Ok(Self {
            config,
            factory,
            key,
            waiter,
            state: CertState::NoCertificate,
            access_token,
        })
    }

    /// The current client certificate, if logged in.
    pub fn client_certificate(&self) -> Option<&ClientCertificate> {
        match &self.state {
            CertState::LoggedIn { cert, .. } => Some(cert),
            CertState::NoCertificate => None,
        }
    }

    /// Whether the current certificate is within the expiry buffer of its
    /// `not_after`. `false` when not logged in.
    #[must_use]
    pub fn is_cert_expired(&self) -> bool {
        self.client_certificate()
            .is_some_and(|cert| cert.is_expired(self.config.cert_expiry_buffer))
    }

    /// Whether the certificate is missing or about to expire.
    #[must_use]
    pub fn needs_login(&self) -> bool {
        self.client_certificate().is_none() || self.is_cert_expired()
    }

    /// Exchange a CSR for a client certificate.
    ///
    /// # Errors
    ///
    /// Returns `Error::LoginFailed` for a rejected CSR or an unparsable
    /// certificate and `Error::CertificateNotDelivered` if the certificate
    /// never shows up.
    pub async fn login(&mut self) -> Result<()> {
        self.state = CertState::NoCertificate;
        let path = self.config.client_cert_path.clone();

        // A leftover certificate must not be mistaken for the new one.
        remove_cert_file(&path).await;

        let csr = self.key.csr_pem(
            &self.config.username,
            &self.config.pod_namespace,
            &self.config.pod_name,
        )?;

        debug!(
            identity = %self.config.username,
            prefix = self.config.username.prefix(),
            "Submitting CSR"
        );

        let response = self
            .factory
            .client()?
            .post(login_url(&self.config.authn_url))
            .header(HOST_ID_PREFIX_HEADER, self.config.username.prefix())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(csr)
            .send()
            .await?;

        if let Some(err) = response::error_for_status(response).await? {
            return Err(Error::LoginFailed(format!("CSR rejected: {err}")));
        }

        let pem = self.waiter.wait_for(&path).await?;
        remove_cert_file(&path).await;

        let cert = ClientCertificate::from_pem(&pem)
            .map_err(|e| Error::LoginFailed(format!("Invalid client certificate: {e}")))?;
        let client = self
            .factory
            .mutual_client(cert.pem().as_bytes(), self.key.pem().as_bytes())?;

        info!(
            identity = %self.config.username,
            common_name = cert.common_name().unwrap_or_default(),
            expires = %cert.not_after(),
            "Logged in, client certificate obtained"
        );

        self.state = CertState::LoggedIn { cert, client };
        Ok(())
    }

    async fn client(&mut self) -> Result<Client> {
        if self.needs_login() {
            if self.is_cert_expired() {
                info!(identity = %self.config.username, "Client certificate expired, logging in again");
            }
            self.login().await?;
        }
        self.logged_in_client()
    }

    /// The mutual-TLS client of the current session, without re-checking
    /// expiry.
    fn logged_in_client(&self) -> Result<Client> {
        match &self.state {
            CertState::LoggedIn { client, .. } => Ok(client.clone()),
            CertState::NoCertificate => Err(Error::LoginFailed(
                "No client certificate after login".to_string(),
            )),
        }
    }

    async fn send_authenticate(&self, client: &Client) -> Result<()> {
        let url = authenticate_url(
            &self.config.authn_url,
            &self.config.account,
            self.config.username.full(),
            self.config.version,
        );
        let response = client.post(url).send().await?;
        let mut token = response::read_access_token(response).await?;
        self.access_token.write(std::mem::take(&mut *token))?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for K8sAuthenticator {
    async fn authenticate(&mut self) -> Result<()> {
        let client = self.client().await?;

        match self.send_authenticate(&client).await {
            Err(e) if e.is_cert_expired() => {
                info!(
                    identity = %self.config.username,
                    "Broker reported an expired client certificate, logging in again"
                );
                // Exactly one re-login per rejection, even if the new
                // certificate already falls inside the expiry buffer.
                self.login().await?;
                let client = self.logged_in_client()?;
                self.send_authenticate(&client).await?;
            }
            other => other?,
        }

        info!(identity = %self.config.username, "Successfully authenticated");
        Ok(())
    }

    fn access_token(&self) -> Arc<dyn AccessTokenStore> {
        Arc::clone(&self.access_token)
    }

    fn authn_type(&self) -> AuthnType {
        AuthnType::K8s
    }
}

impl std::fmt::Debug for K8sAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sAuthenticator")
            .field("identity", &self.config.username.full())
            .field("logged_in", &self.client_certificate().is_some())
            .finish_non_exhaustive()
    }
}

async fn remove_cert_file(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed client certificate file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove client certificate file"),
    }
}
