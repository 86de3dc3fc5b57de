//! TLS plumbing for talking to the broker.
//!
//! - [`client`]: `reqwest` clients pinned to the broker CA, optionally
//!   presenting a client certificate (mutual TLS)
//! - [`cert`]: parsing and expiry checks for the login certificate
//! - [`pem`]: PEM decoding helpers

pub mod cert;
pub mod client;
pub mod pem;

pub use cert::ClientCertificate;
pub use client::{DEFAULT_REQUEST_TIMEOUT, TlsClientFactory, build_client};
