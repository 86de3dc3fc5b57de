//! Strategy selection by declared authentication type.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use super::{
    Authenticator, GcpAuthenticator, GcpConfig, JwtAuthenticator, JwtConfig, K8sAuthenticator,
    K8sConfig,
};
use crate::access_token::{AccessTokenStore, default_store};
use crate::config::Config;
use crate::{Error, Result};

/// Supported authentication strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthnType {
    /// `authn-k8s`: CSR login and mutual TLS
    K8s,
    /// `authn-jwt`: bearer token file
    Jwt,
    /// `authn-gcp`: cloud instance metadata
    Gcp,
}

impl AuthnType {
    /// All registered strategies.
    pub const ALL: [Self; 3] = [Self::K8s, Self::Jwt, Self::Gcp];

    /// Declared type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::K8s => "authn-k8s",
            Self::Jwt => "authn-jwt",
            Self::Gcp => "authn-gcp",
        }
    }

    /// Resolve a declared type, exactly (`authn-jwt`) or by prefix
    /// (`authn-jwt/my-service`).
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedAuthenticationType` for anything else.
    pub fn resolve(declared: &str) -> Result<Self> {
        let declared = declared.trim();
        Self::ALL
            .into_iter()
            .find(|t| {
                declared
                    .strip_prefix(t.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .ok_or_else(|| Error::UnsupportedAuthenticationType(declared.to_string()))
    }

    /// Find the strategy named in the authenticator URL path
    /// (`https://broker/authn-k8s/prod` → `K8s`).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unparsable URL and
    /// `Error::UnsupportedAuthenticationType` when no segment names a
    /// strategy.
    pub fn from_url(authn_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(authn_url)
            .map_err(|e| Error::Config(format!("Invalid authn_url '{authn_url}': {e}")))?;
        parsed
            .path_segments()
            .into_iter()
            .flatten()
            .find_map(|segment| Self::resolve(segment).ok())
            .ok_or_else(|| Error::UnsupportedAuthenticationType(authn_url.to_string()))
    }

    /// Declared type from the configuration, falling back to the URL.
    ///
    /// # Errors
    ///
    /// See [`AuthnType::resolve`] and [`AuthnType::from_url`].
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.authn_type.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(declared) => Self::resolve(declared),
            None => Self::from_url(config.authn_url.trim()),
        }
    }
}

impl FromStr for AuthnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}

impl fmt::Display for AuthnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the authenticator the configuration asks for.
///
/// Uses `access_token` when given, otherwise the default store for
/// `config.access_token_path`.
///
/// # Errors
///
/// Returns configuration errors from strategy resolution and validation.
pub fn new_authenticator(
    config: &Config,
    access_token: Option<Arc<dyn AccessTokenStore>>,
) -> Result<Box<dyn Authenticator>> {
    let authn_type = AuthnType::from_config(config)?;
    let access_token =
        access_token.unwrap_or_else(|| default_store(config.access_token_path.clone()));

    info!(
        authn_type = %authn_type,
        authn_url = %config.authn_url,
        container_mode = %config.container_mode,
        "Creating authenticator"
    );

    let authenticator: Box<dyn Authenticator> = match authn_type {
        AuthnType::K8s => Box::new(K8sAuthenticator::new(
            K8sConfig::from_config(config)?,
            access_token,
        )?),
        AuthnType::Jwt => Box::new(JwtAuthenticator::new(
            JwtConfig::from_config(config)?,
            access_token,
        )?),
        AuthnType::Gcp => Box::new(GcpAuthenticator::new(
            GcpConfig::from_config(config)?,
            access_token,
        )?),
    };
    Ok(authenticator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolve_exact_names() {
        assert_eq!(AuthnType::resolve("authn-k8s").unwrap(), AuthnType::K8s);
        assert_eq!(AuthnType::resolve("authn-jwt").unwrap(), AuthnType::Jwt);
        assert_eq!(AuthnType::resolve("authn-gcp").unwrap(), AuthnType::Gcp);
    }

    #[test]
    fn resolve_by_prefix() {
        assert_eq!(AuthnType::resolve("authn-jwt/my-service").unwrap(), AuthnType::Jwt);
        assert_eq!(AuthnType::resolve(" authn-k8s/prod ").unwrap(), AuthnType::K8s);
    }

    #[test]
    fn resolve_unknown_type_fails() {
        for declared in ["authn-ldap", "authn-k8sx", "", "k8s"] {
            let err = AuthnType::resolve(declared).unwrap_err();
            assert!(matches!(err, Error::UnsupportedAuthenticationType(_)), "{declared}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn from_url_finds_strategy_segment() {
        assert_eq!(
            AuthnType::from_url("https://broker.example.com/api/authn-k8s/prod").unwrap(),
            AuthnType::K8s
        );
        assert_eq!(
            AuthnType::from_url("https://broker.example.com/authn-gcp").unwrap(),
            AuthnType::Gcp
        );
        assert!(matches!(
            AuthnType::from_url("https://broker.example.com/authn"),
            Err(Error::UnsupportedAuthenticationType(_))
        ));
    }

    #[test]
    fn explicit_type_overrides_url() {
        let config = Config {
            authn_url: "https://broker/authn-k8s/prod".to_string(),
            authn_type: Some("authn-jwt".to_string()),
            ..Config::default()
        };
        assert_eq!(AuthnType::from_config(&config).unwrap(), AuthnType::Jwt);
    }

    #[test]
    fn new_authenticator_rejects_unknown_type_before_validation() {
        let config = Config {
            authn_type: Some("authn-oidc".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            new_authenticator(&config, None),
            Err(Error::UnsupportedAuthenticationType(_))
        ));
    }

    #[test]
    fn display_round_trips_through_resolve() {
        for t in AuthnType::ALL {
            assert_eq!(t.to_string().parse::<AuthnType>().unwrap(), t);
        }
    }
}
