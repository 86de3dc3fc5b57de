//! Bearer token authentication
//!
//! Exchanges a pre-issued JWT (typically the projected service account
//! token) for an access token. Every call is a one-shot exchange.

use std::io;
use std::path::PathBuf;
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

/// Settings for the bearer token strategy.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Authenticator base URL
    pub authn_url: String,
    /// Broker account
    pub account: String,
    /// Host identity; `None` lets the broker infer it from the token claims
    pub identity: Option<String>,
    /// Bearer token file
    pub token_path: PathBuf,
    /// Broker CA bundle, PEM
    pub ca_cert: Vec<u8>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl JwtConfig {
    /// Derive the strategy settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a missing URL, account or CA bundle.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            authn_url: config.authn_base_url()?,
            account: config.require_account()?.to_string(),
            identity: config.login().map(str::to_string),
            token_path: config.jwt_token_path.clone(),
            ca_cert: config.ca_certificate()?,
            request_timeout: config.request_timeout,
        })
    }
}

/// Bearer token strategy authenticator.
#[derive(Debug)]
pub struct JwtAuthenticator {
    config: JwtConfig,
    factory: TlsClientFactory,
    access_token: Arc<dyn AccessTokenStore>,
}

impl JwtAuthenticator {
    /// Create the authenticator.
    ///
    /// # Errors
    ///
    /// Returns `Error::UntrustedCa` for an unusable CA bundle.
    pub fn new(config: JwtConfig, access_token: Arc<dyn AccessTokenStore>) -> Result<Self> {
        let factory = TlsClientFactory::new(&config.ca_cert)?.with_timeout(config.request_timeout);
        Ok(Self {
            config,
            factory,
            access_token,
        })
    }

    async fn read_token(&self) -> Result<Zeroizing<String>> {
        let path = &self.config.token_path;
        let token = tokio::fs::read_to_string(path)
            .await
            .map(Zeroizing::new)
            .map_err(|source| Error::TokenUnreadable {
                path: path.clone(),
                source,
            })?;

        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(Error::TokenUnreadable {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, "token file is empty"),
            });
        }
        Ok(Zeroizing::new(trimmed.to_string()))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&mut self) -> Result<()> {
        let jwt = self.read_token().await?;
        let url = token_authenticate_url(
            &self.config.authn_url,
            &self.config.account,
            self.config.identity.as_deref(),
        );
        debug!(url = %url, "Exchanging bearer token");

        let response = self
            .factory
            .client()?
            .post(url)
            .form(&[("jwt", jwt.as_str())])
            .send()
            .await?;

        let mut token = response::read_access_token(response).await?;
        self.access_token.write(std::mem::take(&mut *token))?;

        info!(
            identity = self.config.identity.as_deref().unwrap_or("<from token>"),
            "Successfully authenticated"
        );
        Ok(())
    }

    fn access_token(&self) -> Arc<dyn AccessTokenStore> {
        Arc::clone(&self.access_token)
    }

    fn authn_type(&self) -> AuthnType {
        AuthnType::Jwt
    }
}
