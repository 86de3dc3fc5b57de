//! Workload Authenticator Library
//!
//! Establishes trust between a cluster workload and a remote secrets broker
//! and obtains a short-lived access token, without a human in the loop.
//!
//! # Features
//!
//! - **Certificate strategy**: CSR login, mutual-TLS authenticate, transparent
//!   re-login on certificate expiry
//! - **Bearer token strategy**: exchange a mounted JWT for an access token
//! - **Cloud metadata strategy**: exchange an instance identity token
//! - **Token hand-off**: in-memory or file-backed store, wiped on delete
//! - **Driver**: exponential backoff, refresh loop, cooperative shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access_token;
pub mod authn;
pub mod cli;
pub mod config;
pub mod error;
pub mod retry;
pub mod runner;
pub mod tls;
pub mod username;

pub use error::{AuthenticationError, Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
