//! Bearer token strategy against a mock broker served over TLS.

mod common;

use std::path::Path;
use std::sync::Arc;

use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{TestPki, TlsBroker, broker_error};
use workload_authn::access_token::{AccessTokenStore, MemoryAccessToken};
use workload_authn::authn::{Authenticator, JwtAuthenticator, JwtConfig};
use workload_authn::config::Config;
use workload_authn::Error;

fn jwt_config(broker_uri: &str, pki: &TestPki, token_path: &Path, login: Option<&str>) -> Config {
    Config {
        authn_url: format!("{broker_uri}/authn-jwt/svc"),
        account: "myorg".to_string(),
        authn_login: login.map(str::to_string),
        ssl_certificate: Some(pki.ca_pem().to_string()),
        jwt_token_path: token_path.to_path_buf(),
        ..Config::default()
    }
}

fn authenticator(config: &Config) -> (JwtAuthenticator, Arc<MemoryAccessToken>) {
    let store = Arc::new(MemoryAccessToken::new());
    let auth = JwtAuthenticator::new(JwtConfig::from_config(config).unwrap(), store.clone()).unwrap();
    (auth, store)
}

#[tokio::test]
async fn exchanges_bearer_token_for_access_token() {
    // GIVEN: a mounted token and a broker expecting it form-encoded
    let pki = TestPki::new();
    let broker = TlsBroker::start(&pki).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "header.payload.signature\n").unwrap();

    Mock::given(method("POST"))
        .and(path("/authn-jwt/svc/myorg/authenticate"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string("jwt=header.payload.signature"))
        .respond_with(ResponseTemplate::new(200).set_body_string("jwt-access-token"))
        .expect(1)
        .mount(&broker.anonymous)
        .await;

    let config = jwt_config(&broker.uri(), &pki, &token_path, None);
    let (mut auth, store) = authenticator(&config);

    // WHEN: authenticating
    auth.authenticate().await.unwrap();

    // THEN: the broker's answer is stored
    assert_eq!(store.read().unwrap().as_slice(), b"jwt-access-token");
}

#[tokio::test]
async fn identity_scopes_the_endpoint() {
    let pki = TestPki::new();
    let broker = TlsBroker::start(&pki).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "a.b.c").unwrap();

    Mock::given(method("POST"))
        .and(path("/authn-jwt/svc/myorg/host%2Fapps%2Fjwt-app/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("scoped-token"))
        .expect(1)
        .mount(&broker.anonymous)
        .await;

    let config = jwt_config(&broker.uri(), &pki, &token_path, Some("host/apps/jwt-app"));
    let (mut auth, store) = authenticator(&config);

    auth.authenticate().await.unwrap();
    assert_eq!(store.read().unwrap().as_slice(), b"scoped-token");
}

#[tokio::test]
async fn missing_token_file_fails_before_contacting_broker() {
    // GIVEN: no token file
    let pki = TestPki::new();
    let broker = TlsBroker::start(&pki).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("absent");

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unreachable"))
        .expect(0)
        .mount(&broker.anonymous)
        .await;

    let config = jwt_config(&broker.uri(), &pki, &token_path, None);
    let (mut auth, store) = authenticator(&config);

    // WHEN: authenticating
    let err = auth.authenticate().await.unwrap_err();

    // THEN: TokenUnreadable, and the broker never saw a request
    assert!(matches!(err, Error::TokenUnreadable { ref path, .. } if path == &token_path), "{err}");
    assert!(matches!(store.read(), Err(Error::NoData)));
    broker.verify().await;
}

#[tokio::test]
async fn empty_token_file_is_unreadable() {
    let pki = TestPki::new();
    let broker = TlsBroker::start(&pki).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "  \n").unwrap();

    let config = jwt_config(&broker.uri(), &pki, &token_path, None);
    let (mut auth, _store) = authenticator(&config);

    assert!(matches!(
        auth.authenticate().await,
        Err(Error::TokenUnreadable { .. })
    ));
}

#[tokio::test]
async fn broker_rejection_is_authenticate_failure() {
    let pki = TestPki::new();
    let broker = TlsBroker::start(&pki).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "a.b.c").unwrap();

    Mock::given(method("POST"))
        .and(path("/authn-jwt/svc/myorg/authenticate"))
        .respond_with(ResponseTemplate::new(401).set_body_json(broker_error("invalid_token", "token expired")))
        .expect(1)
        .mount(&broker.anonymous)
        .await;

    let config = jwt_config(&broker.uri(), &pki, &token_path, None);
    let (mut auth, _store) = authenticator(&config);

    let err = auth.authenticate().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_cert_expired());
    match err {
        Error::AuthenticateFailed(e) => {
            assert_eq!(e.status, 401);
            assert_eq!(e.message, "token expired");
        }
        other => panic!("unexpected error: {other}"),
    }
}
