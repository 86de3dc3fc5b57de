//! Cloud metadata authentication
//!
//! Fetches an identity token for the instance's default service account
//! from the metadata server, then exchanges it with the broker the same way
//! the bearer token strategy does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::response::{self, token_authenticate_url};
use super::{Authenticator, AuthnType};
use crate::access_token::AccessTokenStore;
use crate::config::Config;
use crate::tls::TlsClientFactory;
use crate::{Error, Result};

/// Header the metadata server insists on.
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Settings for the cloud metadata strategy.
#[derive(Debug, Clone)]
pub struct GcpConfig {
    /// Authenticator base URL
    pub authn_url: String,
    /// Broker account
    pub account: String,
    /// Host identity the token audience is scoped to
    pub identity: String,
    /// Metadata identity endpoint
    pub metadata_url: String,
    /// First segment of the requested audience
    pub audience_prefix: String,
    /// Broker CA bundle, PEM
    pub ca_cert: Vec<u8>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl GcpConfig {
    /// Derive the strategy settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` without a host identity and
    /// `Error::Config` for other missing settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        let identity = config.login().ok_or_else(|| {
            Error::invalid_identity("", "a host identity is required for metadata authentication")
        })?;

        Ok(Self {
            authn_url: config.authn_base_url()?,
            account: config.require_account()?.to_string(),
            identity: identity.to_string(),
            metadata_url: config.gcp_metadata_url.clone(),
            audience_prefix: config.gcp_audience_prefix.trim_end_matches('/').to_string(),
            ca_cert: config.ca_certificate()?,
            request_timeout: config.request_timeout,
        })
    }

    /// Audience requested from the metadata server:
    /// `<prefix>/<account>/<identity>`.
    pub fn audience(&self) -> String {
        format!("{}/{}/{}", self.audience_prefix, self.account, self.identity)
    }
}

/// Cloud metadata strategy authenticator.
#[derive(Debug)]
pub struct GcpAuthenticator {
    config: GcpConfig,
    factory: TlsClientFactory,
    access_token: Arc<dyn AccessTokenStore>,
}

impl GcpAuthenticator {
    /// Create the authenticator.
    ///
    /// # Errors
    ///
    /// Returns `Error::UntrustedCa` for an unusable CA bundle.
    pub fn new(config: GcpConfig, access_token: Arc<dyn AccessTokenStore>) -> Result<Self> {
        let factory = TlsClientFactory::new(&config.ca_cert)?.with_timeout(config.request_timeout);
        Ok(Self {
            config,
            factory,
            access_token,
        })
    }

    async fn identity_token(&self) -> Result<Zeroizing<String>> {
        let response = self
            .factory
            .client()?
            .get(&self.config.metadata_url)
            .header(METADATA_FLAVOR_HEADER, "Google")
            .query(&[("audience", self.config.audience().as_str()), ("format", "full")])
            .send()
            .await
            .map_err(|e| Error::MetadataUnavailable(e.to_string()))?;

        let status = response.status();
        let body = Zeroizing::new(
            response
                .text()
                .await
                .map_err(|e| Error::MetadataUnavailable(e.to_string()))?,
        );
        if !status.is_success() {
            return Err(Error::MetadataUnavailable(format!(
                "metadata server returned status {}",
                status.as_u16()
            )));
        }

        let token = body.trim();
        if token.is_empty() {
            return Err(Error::MetadataUnavailable(
                "metadata server returned an empty token".to_string(),
            ));
        }
        Ok(Zeroizing::new(token.to_string()))
    }
}

#[async_trait]
impl Authenticator for GcpAuthenticator {
    async fn authenticate(&mut self) -> Result<()> {
        let jwt = self.identity_token().await?;
        debug!(audience = %self.config.audience(), "Identity token obtained from metadata server");

        let url = token_authenticate_url(&self.config.authn_url, &self.config.account, None);
        let response = self
            .factory
            .client()?
            .post(url)
            .form(&[("jwt", jwt.as_str())])
            .send()
            .await?;

        let mut token = response::read_access_token(response).await?;
        self.access_token.write(std::mem::take(&mut *token))?;

        info!(identity = %self.config.identity, "Successfully authenticated");
        Ok(())
    }

    fn access_token(&self) -> Arc<dyn AccessTokenStore> {
        Arc::clone(&self.access_token)
    }

    fn authn_type(&self) -> AuthnType {
        AuthnType::Gcp
    }
}
