//! Client certificate parsing and expiry checks.
//!
//! Wraps the certificate the broker issues at login. Only the fields the
//! engine acts on are extracted: the subject CN and SAN URIs (for logs) and
//! the validity window (for the expiry state machine).

use std::time::Duration;

use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use super::pem::parse_certs;
use crate::{Error, Result};

/// A parsed, broker-signed client certificate.
///
/// Never mutated: a re-login produces a fresh value that replaces the old
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pem: String,
    common_name: Option<String>,
    san_uris: Vec<String>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl ClientCertificate {
    /// Parse the first certificate of a PEM buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` when the PEM or the DER inside it is
    /// malformed.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let der = parse_certs(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Certificate("Empty certificate chain".to_string()))?;

        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| Error::Certificate(format!("Failed to parse client certificate: {e}")))?;

        let validity = cert.validity();

        Ok(Self {
            pem: String::from_utf8_lossy(pem).into_owned(),
            common_name: extract_cn(&cert),
            san_uris: extract_san_uris(&cert),
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
        })
    }

    /// The certificate as received, PEM-encoded.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Subject Common Name.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Subject Alternative Name URIs.
    pub fn san_uris(&self) -> &[String] {
        &self.san_uris
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Whether the certificate is expired at `now`, treating the last
    /// `buffer` of its lifetime as already expired.
    pub fn is_expired_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
        let buffer = time::Duration::try_from(buffer).unwrap_or(time::Duration::MAX);
        now.saturating_add(buffer) >= self.not_after
    }

    /// Whether the certificate is expired right now.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc(), buffer)
    }
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_san_uris(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut uris = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::URI(uri) = name {
                uris.push((*uri).to_owned());
            }
        }
    }
    uris
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType, string::Ia5String};

    fn make_cert(not_before: OffsetDateTime, not_after: OffsetDateTime) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "ns.sa.pod");
        params.distinguished_name = dn;
        params.subject_alt_names = vec![SanType::URI(
            Ia5String::try_from("spiffe://cluster.local/namespace/ns/podname/pod").unwrap(),
        )];
        params.not_before = not_before;
        params.not_after = not_after;
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn from_pem_extracts_identity_fields() {
        let now = OffsetDateTime::now_utc();
        let pem = make_cert(now - time::Duration::hours(1), now + time::Duration::days(1));
        let cert = ClientCertificate::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(cert.common_name(), Some("ns.sa.pod"));
        assert_eq!(
            cert.san_uris(),
            ["spiffe://cluster.local/namespace/ns/podname/pod".to_string()]
        );
        assert!(cert.not_before() < cert.not_after());
    }

    #[test]
    fn past_not_after_is_expired() {
        // GIVEN: a certificate that expired an hour ago
        let now = OffsetDateTime::now_utc();
        let pem = make_cert(now - time::Duration::days(2), now - time::Duration::hours(1));
        let cert = ClientCertificate::from_pem(pem.as_bytes()).unwrap();
        // THEN: expiry check trips even without a buffer
        assert!(cert.is_expired(Duration::ZERO));
    }

    #[test]
    fn future_not_after_is_not_expired() {
        let now = OffsetDateTime::now_utc();
        let pem = make_cert(now - time::Duration::hours(1), now + time::Duration::days(3));
        let cert = ClientCertificate::from_pem(pem.as_bytes()).unwrap();
        assert!(!cert.is_expired(Duration::ZERO));
        assert!(!cert.is_expired(Duration::from_secs(5)));
    }

    #[test]
    fn buffer_pulls_expiry_forward() {
        let now = OffsetDateTime::now_utc();
        let pem = make_cert(now - time::Duration::hours(1), now + time::Duration::minutes(2));
        let cert = ClientCertificate::from_pem(pem.as_bytes()).unwrap();
        assert!(!cert.is_expired_at(now, Duration::from_secs(30)));
        assert!(cert.is_expired_at(now, Duration::from_secs(300)));
    }

    #[test]
    fn from_pem_rejects_garbage() {
        assert!(matches!(
            ClientCertificate::from_pem(b"garbage"),
            Err(Error::Certificate(_))
        ));
    }
}
