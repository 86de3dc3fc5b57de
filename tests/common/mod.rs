//! Shared fixtures: a throwaway broker CA, a TLS front for wiremock brokers
//! and wiremock responders.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, IsCa, Issuer, KeyPair, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use time::{Duration, OffsetDateTime};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

use workload_authn::config::Config;

/// Identity used by the certificate flow tests.
pub const IDENTITY: &str = "host/apps/ns/sa/pod";

/// Test broker CA able to sign workload CSRs.
pub struct TestPki {
    ca_key: KeyPair,
    ca_pem: String,
    ca_der: CertificateDer<'static>,
}

impl TestPki {
    pub fn new() -> Arc<Self> {
        let ca_key = KeyPair::generate().expect("CA key");
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("Test Broker CA".to_string()),
        );
        params.distinguished_name = dn;
        let cert = params.self_signed(&ca_key).expect("CA certificate");

        Arc::new(Self {
            ca_key,
            ca_pem: cert.pem(),
            ca_der: cert.der().clone(),
        })
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Server certificate for `localhost` / `127.0.0.1`, signed by this CA.
    pub fn server_identity(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let key = KeyPair::generate().expect("server key");
        let mut params =
            CertificateParams::new(vec!["localhost".to_string()]).expect("server params");
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        let issuer = Issuer::from_ca_cert_pem(&self.ca_pem, &self.ca_key).expect("issuer");
        let cert = params.signed_by(&key, &issuer).expect("server certificate");
        (
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )
    }

    /// TLS acceptor presenting [`TestPki::server_identity`] that asks every
    /// client for a certificate issued by this CA but lets anonymous clients
    /// through.
    pub fn acceptor(&self) -> TlsAcceptor {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).expect("CA into root store");

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .allow_unauthenticated()
            .build()
            .expect("client verifier");
        let (chain, key) = self.server_identity();
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .expect("server config");

        TlsAcceptor::from(Arc::new(config))
    }

    /// Sign `csr_pem` with the given validity window.
    pub fn sign_csr(
        &self,
        csr_pem: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> String {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem).expect("valid CSR");
        csr.params.not_before = not_before;
        csr.params.not_after = not_after;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_pem, &self.ca_key).expect("issuer");
        csr.signed_by(&issuer).expect("signed certificate").pem()
    }
}

/// Terminate TLS on a fresh local port and splice every connection to a
/// plain backend: `mutual` when the client presented a certificate,
/// `anonymous` otherwise. Presented leaf certificates are recorded in `seen`.
pub async fn spawn_tls_front(
    acceptor: TlsAcceptor,
    anonymous: SocketAddr,
    mutual: SocketAddr,
    seen: Arc<Mutex<Vec<CertificateDer<'static>>>>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind TLS front");
    let addr = listener.local_addr().expect("TLS front address");

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let peer = tls
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|chain| chain.first())
                    .cloned();
                let backend = match peer {
                    Some(cert) => {
                        seen.lock().push(cert);
                        mutual
                    }
                    None => anonymous,
                };
                let Ok(mut upstream) = TcpStream::connect(backend).await else {
                    return;
                };
                let _ = tokio::io::copy_bidirectional(&mut tls, &mut upstream).await;
            });
        }
    });

    addr
}

/// Mock broker reachable over HTTPS only.
///
/// Requests from clients without a certificate land on `anonymous`, requests
/// over mutual TLS on `mutual`, so a mock mounted on `mutual` only ever
/// matches callers that completed the client-certificate handshake.
pub struct TlsBroker {
    pub anonymous: MockServer,
    pub mutual: MockServer,
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<CertificateDer<'static>>>>,
}

impl TlsBroker {
    /// Start a broker whose server certificate is issued by `pki`.
    pub async fn start(pki: &TestPki) -> Self {
        let anonymous = MockServer::start().await;
        let mutual = MockServer::start().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_tls_front(
            pki.acceptor(),
            *anonymous.address(),
            *mutual.address(),
            Arc::clone(&seen),
        )
        .await;

        Self {
            anonymous,
            mutual,
            addr,
            seen,
        }
    }

    pub fn uri(&self) -> String {
        format!("https://127.0.0.1:{}", self.addr.port())
    }

    /// Client certificates presented so far, one per mutual-TLS connection.
    pub fn client_certificates(&self) -> Vec<CertificateDer<'static>> {
        self.seen.lock().clone()
    }

    pub async fn verify(&self) {
        self.anonymous.verify().await;
        self.mutual.verify().await;
    }
}

/// Plays the broker's side of `inject_client_cert`: signs the posted CSR and
/// drops the certificate at `cert_path`, like the broker does inside the pod.
pub struct CsrSigner {
    pki: Arc<TestPki>,
    cert_path: PathBuf,
    lifetime: Duration,
}

impl CsrSigner {
    pub fn new(pki: Arc<TestPki>, cert_path: impl Into<PathBuf>) -> Self {
        Self {
            pki,
            cert_path: cert_path.into(),
            lifetime: Duration::days(1),
        }
    }

    /// Issue certificates valid for `lifetime` from now (negative = already
    /// expired).
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

impl Respond for CsrSigner {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let csr = String::from_utf8_lossy(&request.body);
        let now = OffsetDateTime::now_utc();
        let not_before = now - Duration::days(2);
        let pem = self.pki.sign_csr(&csr, not_before, now + self.lifetime);
        std::fs::write(&self.cert_path, pem).expect("write client certificate");
        ResponseTemplate::new(200)
    }
}

/// Broker error body carrying `reason`.
pub fn broker_error(reason: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "code": "unauthorized",
        "error": { "message": message, "code": reason }
    })
}

/// Certificate strategy configuration against a mock broker.
pub fn k8s_config(broker_uri: &str, pki: &TestPki, cert_path: &Path) -> Config {
    let mut config = Config {
        authn_url: format!("{broker_uri}/authn-k8s/test"),
        account: "myorg".to_string(),
        authn_login: Some(IDENTITY.to_string()),
        ssl_certificate: Some(pki.ca_pem().to_string()),
        pod_name: Some("pod-0".to_string()),
        pod_namespace: Some("ns".to_string()),
        client_cert_path: cert_path.to_path_buf(),
        client_cert_retry_count_limit: 5,
        client_cert_poll_interval: std::time::Duration::from_millis(10),
        ..Config::default()
    };
    config.retry.enabled = false;
    config
}
