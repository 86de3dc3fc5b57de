//! Broker endpoint URLs and response handling shared by every strategy.

use reqwest::Response;
use url::form_urlencoded;
use zeroize::Zeroizing;

use crate::config::BrokerVersion;
use crate::error::AuthenticationError;
use crate::{Error, Result};

/// Percent-encode an identity for use as a single path segment
/// (`host/apps/pod` → `host%2Fapps%2Fpod`).
pub(crate) fn encode_identity(identity: &str) -> String {
    form_urlencoded::byte_serialize(identity.as_bytes()).collect()
}

/// `{authn_url}/inject_client_cert`
pub(crate) fn login_url(authn_url: &str) -> String {
    format!("{authn_url}/inject_client_cert")
}

/// Authenticate endpoint for the certificate strategy.
pub(crate) fn authenticate_url(
    authn_url: &str,
    account: &str,
    identity: &str,
    version: BrokerVersion,
) -> String {
    let identity = encode_identity(identity);
    match version {
        BrokerVersion::V5 => format!("{authn_url}/{account}/{identity}/authenticate"),
        BrokerVersion::V4 => format!("{authn_url}/users/{identity}/authenticate"),
    }
}

/// Authenticate endpoint for token exchanges, where the identity may be
/// left to the broker to infer from the token claims.
pub(crate) fn token_authenticate_url(
    authn_url: &str,
    account: &str,
    identity: Option<&str>,
) -> String {
    match identity {
        Some(identity) => format!(
            "{authn_url}/{account}/{}/authenticate",
            encode_identity(identity)
        ),
        None => format!("{authn_url}/{account}/authenticate"),
    }
}

/// Consume an authenticate response: the body on 2xx, otherwise
/// `Error::AuthenticateFailed` carrying the parsed broker error.
pub(crate) async fn read_access_token(response: Response) -> Result<Zeroizing<Vec<u8>>> {
    let status = response.status();
    let body = Zeroizing::new(response.bytes().await?.to_vec());
    if status.is_success() {
        Ok(body)
    } else {
        Err(Error::AuthenticateFailed(AuthenticationError::from_response(
            status.as_u16(),
            &body,
        )))
    }
}

/// Turn a non-2xx response into the broker error it carries; `Ok(None)` on
/// 2xx.
///
/// # Errors
///
/// Returns `Error::Http` when the error body cannot be read.
pub(crate) async fn error_for_status(response: Response) -> Result<Option<AuthenticationError>> {
    let status = response.status();
    if status.is_success() {
        return Ok(None);
    }
    let body = response.bytes().await?;
    Ok(Some(AuthenticationError::from_response(status.as_u16(), &body)))
}
