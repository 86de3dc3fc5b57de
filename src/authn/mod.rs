//! Authentication strategies
//!
//! Each strategy proves the workload's identity to the broker its own way
//! and ends the same way: the broker-issued access token lands in the
//! strategy's [`AccessTokenStore`].
//!
//! - [`K8sAuthenticator`]: CSR login, then mutual-TLS authenticate
//! - [`JwtAuthenticator`]: bearer token from a file
//! - [`GcpAuthenticator`]: identity token from the instance metadata server

pub mod gcp;
pub mod jwt;
pub mod k8s;
pub mod registry;
pub(crate) mod response;

pub use gcp::{GcpAuthenticator, GcpConfig};
pub use jwt::{JwtAuthenticator, JwtConfig};
pub use k8s::{CertificateWaiter, FileCertificateWaiter, K8sAuthenticator, K8sConfig};
pub use registry::{AuthnType, new_authenticator};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::access_token::AccessTokenStore;

/// Common contract of every authentication strategy.
#[async_trait]
pub trait Authenticator: Send + fmt::Debug {
    /// Run one authentication exchange and store the resulting token.
    ///
    /// # Errors
    ///
    /// Returns the failure of this attempt; [`crate::Error::is_retryable`]
    /// tells the caller whether another attempt makes sense.
    async fn authenticate(&mut self) -> Result<()>;

    /// Store receiving the access token.
    fn access_token(&self) -> Arc<dyn AccessTokenStore>;

    /// Which strategy this is.
    fn authn_type(&self) -> AuthnType;
}
