//! Integration tests for the manager lifecycle against a mocked Vault.
//!
//! These tests verify that the SecretManager correctly:
//! - Performs the first exchange on start and serves the JWT
//! - Arms the renewal timer from the reported TTL
//! - Propagates start failures and stays not-ready
//! - Shares a single first exchange between concurrent starters
//! - Reuses one manager per seed identity

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokenwarden_core::{
    ManagerConfig, ManagerEvent, ManagerState, ReqwestTransport, SecretError, SecretManager,
    SecretRegistry, VAULT_TOKEN_HEADER,
};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const EXCHANGE_PATH: &str = "/v1/identity/oidc/token/edge-role";
const SEED_T0: &[u8] = br#"{"auth":{"client_token":"T0"}}"#;

fn config_for(server: &MockServer) -> ManagerConfig {
    let addr = server.address();
    ManagerConfig::new(addr.ip().to_string(), "edge-role").with_port(addr.port())
}

fn open(registry: &SecretRegistry, config: ManagerConfig, seed: &[u8]) -> SecretManager {
    let transport = Arc::new(ReqwestTransport::new(config.request_timeout).unwrap());
    SecretManager::open(registry, config, transport, seed).unwrap()
}

async fn mount_exchange(server: &MockServer, token: &str, ttl: f64) {
    Mock::given(method("GET"))
        .and(path(EXCHANGE_PATH))
        .and(header(VAULT_TOKEN_HEADER, "T0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"token": token, "ttl": ttl}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_start_exchanges_seed_and_arms_renewal() {
    let server = MockServer::start().await;
    mount_exchange(&server, "JWT1", 100.0).await;

    let registry = SecretRegistry::new();
    let manager = open(&registry, config_for(&server), SEED_T0);
    let mut events = manager.subscribe();

    assert_eq!(manager.state(), ManagerState::Created);
    assert!(matches!(manager.jwt(), Err(SecretError::NotReady)));

    manager.start().await.unwrap();

    assert_eq!(manager.state(), ManagerState::Ready);
    assert_eq!(manager.jwt().unwrap(), "JWT1");

    match events.recv().await.unwrap() {
        ManagerEvent::Ready { ttl } => assert!((ttl - 100.0).abs() < f64::EPSILON),
        other => panic!("expected Ready, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        ManagerEvent::RenewalScheduled { delay } => assert_eq!(delay, Duration::from_secs(75)),
        other => panic!("expected RenewalScheduled, got {other:?}"),
    }

    let context = manager.auth_context().unwrap();
    assert_eq!(context.token.expose(), "JWT1");
    assert!(!context.is_expired());

    manager.stop();
}

#[tokio::test]
async fn test_start_forbidden_fails_and_stays_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EXCHANGE_PATH))
        .respond_with(
            ResponseTemplate::new(403).set_body_string(r#"{"errors":["permission denied"]}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = SecretRegistry::new();
    let manager = open(&registry, config_for(&server), SEED_T0);

    let err = manager.start().await.unwrap_err();
    match err {
        SecretError::ExchangeFailed { status, body, .. } => {
            assert_eq!(status, Some(403));
            assert!(body.contains("permission denied"));
        }
        other => panic!("expected ExchangeFailed, got {other:?}"),
    }
    assert_eq!(manager.state(), ManagerState::Failed);
    assert!(matches!(manager.jwt(), Err(SecretError::NotReady)));
}

#[tokio::test]
async fn test_concurrent_start_performs_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EXCHANGE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"data": {"token": "JWT1", "ttl": 100}}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = SecretRegistry::new();
    let first = open(&registry, config_for(&server), SEED_T0);
    let second = open(&registry, config_for(&server), SEED_T0);
    assert!(first.same_instance(&second));

    let (a, b) = tokio::join!(first.start(), second.start());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(first.jwt().unwrap(), "JWT1");
    assert_eq!(second.jwt().unwrap(), "JWT1");

    // Already ready: no further exchange.
    first.start().await.unwrap();

    first.stop();
}

#[tokio::test]
async fn test_concurrent_failed_start_shares_error_and_later_start_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EXCHANGE_PATH))
        .respond_with(ResponseTemplate::new(403).set_delay(Duration::from_millis(200)))
        .expect(2)
        .mount(&server)
        .await;

    let registry = SecretRegistry::new();
    let manager = open(&registry, config_for(&server), SEED_T0);

    let (a, b) = tokio::join!(manager.start(), manager.start());
    assert!(matches!(a, Err(SecretError::ExchangeFailed { status: Some(403), .. })));
    assert!(matches!(b, Err(SecretError::ExchangeFailed { status: Some(403), .. })));

    // A fresh call after the attempt has finished tries again.
    assert!(manager.start().await.is_err());
}

#[tokio::test]
async fn test_jwt_ready_waits_for_first_exchange() {
    let server = MockServer::start().await;
    mount_exchange(&server, "JWT1", 100.0).await;

    let registry = SecretRegistry::new();
    let manager = open(&registry, config_for(&server), SEED_T0);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.jwt_ready().await })
    };
    tokio::task::yield_now().await;

    manager.start().await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), "JWT1");

    manager.stop();
}

#[tokio::test]
async fn test_jwt_ready_times_out_when_never_started() {
    let server = MockServer::start().await;
    let registry = SecretRegistry::new();
    let config = config_for(&server).with_ready_timeout(Duration::from_millis(50));
    let manager = open(&registry, config, SEED_T0);

    assert!(matches!(
        manager.jwt_ready().await,
        Err(SecretError::NotReady)
    ));
}

#[tokio::test]
async fn test_start_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = SecretRegistry::new();
    let config = ManagerConfig::new(addr.ip().to_string(), "edge-role").with_port(addr.port());
    let manager = open(&registry, config, SEED_T0);

    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, SecretError::Transport { .. }));
    assert_eq!(manager.state(), ManagerState::Failed);
    assert!(matches!(manager.jwt(), Err(SecretError::NotReady)));
}

#[tokio::test]
async fn test_connect_from_seed_file_reuses_manager() {
    let server = MockServer::start().await;
    mount_exchange(&server, "JWT1", 100.0).await;

    let mut seed = tempfile::NamedTempFile::new().unwrap();
    seed.write_all(SEED_T0).unwrap();

    let registry = SecretRegistry::new();
    let first = SecretManager::connect(&registry, config_for(&server), seed.path())
        .await
        .unwrap();
    let second = SecretManager::connect(&registry, config_for(&server), seed.path())
        .await
        .unwrap();
    assert!(first.same_instance(&second));
    assert_eq!(registry.len(), 1);

    first.start().await.unwrap();
    assert_eq!(second.jwt().unwrap(), "JWT1");

    second.stop();
    assert!(registry.is_empty());
    assert_eq!(first.state(), ManagerState::Stopped);
    assert!(matches!(first.jwt(), Err(SecretError::Stopped)));
}

#[tokio::test]
async fn test_open_rejects_bad_seed_and_bad_config() {
    let server = MockServer::start().await;
    let registry = SecretRegistry::new();
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());

    let result = SecretManager::open(
        &registry,
        config_for(&server),
        transport.clone(),
        br#"{"auth":{}}"#,
    );
    assert!(matches!(result, Err(SecretError::MalformedSeed { .. })));

    let result = SecretManager::open(
        &registry,
        config_for(&server).with_renewal_factor(1.5),
        transport,
        SEED_T0,
    );
    assert!(matches!(result, Err(SecretError::Config { .. })));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_open_on_registered_identity_ignores_new_config() {
    let server = MockServer::start().await;
    let registry = SecretRegistry::new();
    let first = open(&registry, config_for(&server), SEED_T0);

    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
    let second = SecretManager::open(
        &registry,
        config_for(&server).with_renewal_factor(1.5),
        transport,
        SEED_T0,
    )
    .unwrap();

    assert!(first.same_instance(&second));
    assert!((second.config().renewal_factor - 0.75).abs() < f64::EPSILON);
    assert_eq!(registry.len(), 1);
}
