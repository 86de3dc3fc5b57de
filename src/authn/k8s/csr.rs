//! Session key material and certificate signing requests.

use std::fmt;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SanType, string::Ia5String,
};
use zeroize::Zeroizing;

use crate::username::Username;
use crate::{Error, Result};

/// Keypair generated once per authenticator and never written to disk.
pub struct SessionKey {
    key_pair: KeyPair,
    pem: Zeroizing<String>,
}

impl SessionKey {
    /// Generate a fresh ECDSA P-256 keypair.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` if key generation fails.
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("Failed to generate session key: {e}")))?;
        let pem = Zeroizing::new(key_pair.serialize_pem());
        Ok(Self { key_pair, pem })
    }

    /// PKCS#8 PEM of the private key.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Build a PEM CSR for this workload signed with the session key.
    ///
    /// The subject CN is the identity suffix; the URI SAN names the pod as
    /// `spiffe://cluster.local/namespace/<ns>/podname/<pod>`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` if the request cannot be built.
    pub fn csr_pem(&self, username: &Username, namespace: &str, pod_name: &str) -> Result<String> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(username.suffix().to_string()),
        );
        params.distinguished_name = dn;

        let uri = spiffe_id(namespace, pod_name);
        params.subject_alt_names = vec![SanType::URI(
            Ia5String::try_from(uri.clone())
                .map_err(|e| Error::Certificate(format!("Invalid SAN URI '{uri}': {e}")))?,
        )];

        let csr = params
            .serialize_request(&self.key_pair)
            .map_err(|e| Error::Certificate(format!("Failed to create CSR: {e}")))?;
        csr.pem()
            .map_err(|e| Error::Certificate(format!("Failed to serialize CSR: {e}")))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

/// Workload URI carried in the CSR.
pub fn spiffe_id(namespace: &str, pod_name: &str) -> String {
    format!("spiffe://cluster.local/namespace/{namespace}/podname/{pod_name}")
}
