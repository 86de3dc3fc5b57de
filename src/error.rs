//! Error types for workload authentication

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for workload authentication
pub type Result<T> = std::result::Result<T, Error>;

/// Reason code the broker uses to signal an expired client certificate.
pub const CERT_EXPIRED: &str = "cert_expired";

/// Workload authentication errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity string does not name a host
    #[error("Invalid identity '{identity}': {reason}")]
    InvalidIdentity {
        /// The rejected identity
        identity: String,
        /// Why it was rejected
        reason: String,
    },

    /// CA certificate could not be loaded into the trust pool
    #[error("Untrusted CA certificate: {0}")]
    UntrustedCa(String),

    /// No strategy is registered for the declared type
    #[error("Unsupported authentication type: {0}")]
    UnsupportedAuthenticationType(String),

    /// CSR exchange failed
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Broker accepted the CSR but the certificate never showed up
    #[error("Client certificate not delivered to '{}' after {waited:?}", path.display())]
    CertificateNotDelivered {
        /// Where the certificate was expected
        path: PathBuf,
        /// Total time spent waiting
        waited: Duration,
    },

    /// Key generation, CSR building or certificate parsing failed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Broker rejected the authenticate request
    #[error("Authenticate failed: {0}")]
    AuthenticateFailed(AuthenticationError),

    /// Bearer token file is absent or unreadable
    #[error("Token file '{}' is unreadable: {source}", path.display())]
    TokenUnreadable {
        /// Token file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Instance metadata endpoint did not hand out an identity token
    #[error("Metadata endpoint unavailable: {0}")]
    MetadataUnavailable(String),

    /// Attempt to store an empty access token
    #[error("Access token payload is empty")]
    EmptyPayload,

    /// Access token store holds no data
    #[error("Access token store holds no data")]
    NoData,

    /// Access token file was already gone when deleting
    #[error("Access token file '{}' does not exist", .0.display())]
    TokenFileMissing(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Attempt aborted by cancellation
    #[error("Authentication cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the retry driver should try again after this error.
    ///
    /// Configuration errors are fatal; transport, protocol and local I/O
    /// failures are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_)
                | Self::InvalidIdentity { .. }
                | Self::UntrustedCa(_)
                | Self::UnsupportedAuthenticationType(_)
        )
    }

    /// Whether this error carries the broker's `cert_expired` reason.
    #[must_use]
    pub fn is_cert_expired(&self) -> bool {
        matches!(self, Self::AuthenticateFailed(e) if e.is_cert_expired())
    }

    pub(crate) fn invalid_identity(identity: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            identity: identity.to_string(),
            reason: reason.into(),
        }
    }
}

/// A non-2xx answer from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationError {
    /// HTTP status code
    pub status: u16,
    /// Human readable message
    pub message: String,
    /// Machine readable reason, if the body carried one
    pub reason: Option<String>,
}

impl AuthenticationError {
    /// Build an error from a status code and raw response body.
    ///
    /// The body is expected to be `{"code": .., "error": {"message": .., "code": ..}}`.
    /// Anything else becomes a generic error holding the body text.
    #[must_use]
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => {
                let detail = parsed.error.unwrap_or_default();
                Self {
                    status,
                    message: detail
                        .message
                        .unwrap_or_else(|| format!("broker returned status {status}")),
                    reason: detail.code.or(parsed.code),
                }
            }
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                Self {
                    status,
                    message: if text.is_empty() {
                        format!("broker returned status {status}")
                    } else {
                        text
                    },
                    reason: None,
                }
            }
        }
    }

    /// Whether the broker reported an expired client certificate.
    #[must_use]
    pub fn is_cert_expired(&self) -> bool {
        self.reason.as_deref() == Some(CERT_EXPIRED)
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}
