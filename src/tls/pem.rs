//! PEM decoding for certificates and private keys.
//!
//! All certificate and key material handled by the engine is **PEM**: the CA
//! bundle from configuration, the certificate the broker drops on disk and
//! the session key generated at login.

use std::fs;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

/// Decode every certificate block in a PEM buffer.
///
/// # Errors
///
/// Returns `Error::Certificate` if the buffer is not valid PEM or holds no
/// certificate.
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(Error::Certificate(
            "No certificates found in PEM data".to_string(),
        ));
    }

    Ok(certs)
}

/// Decode the first private key in a PEM buffer.
///
/// Supports PKCS#8 (`PRIVATE KEY`), RSA and SEC1 EC keys.
///
/// # Errors
///
/// Returns `Error::Certificate` if no key can be decoded.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Certificate(format!("Failed to parse private key PEM: {e}")))?
        .ok_or_else(|| Error::Certificate("No private key found in PEM data".to_string()))
}

/// Read a PEM file from disk.
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read.
pub fn read_pem_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}
