use crate::auth::DRY_RUN_COOKIE;
use crate::RedditClient;
use outreach_core::{
    AppConfig, ConfigError, CoreError, LoginRequest, LoginStatus, ProxyConfig, ProxyScheme,
    RotationMode, SESSION_COOKIE,
};
use tokio_util::sync::CancellationToken;

const TEST_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";

fn create_test_config(dir: &tempfile::TempDir) -> AppConfig {
    AppConfig {
        state_file: dir.path().join("state.enc"),
        encryption_key: Some(TEST_KEY.to_string()),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_client_creation() {
    let dir = tempfile::tempdir().unwrap();
    let client = RedditClient::from_config(create_test_config(&dir)).unwrap();

    assert!(client.config().dry_run);
    assert!(!client.session_health().await.logged_in);
    assert_eq!(client.sessions().path(), dir.path().join("state.enc"));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = create_test_config(&dir);
    config.discovery_concurrency = 0;
    assert!(matches!(
        RedditClient::from_config(config),
        Err(CoreError::Config(ConfigError::InvalidValue { .. }))
    ));

    let mut config = create_test_config(&dir);
    config.encryption_key = Some("not-a-key".to_string());
    assert!(matches!(
        RedditClient::from_config(config),
        Err(CoreError::Config(ConfigError::InvalidEncryptionKey))
    ));
}

#[tokio::test]
async fn test_dry_run_login_stores_placeholder_session() {
    let dir = tempfile::tempdir().unwrap();
    let client = RedditClient::from_config(create_test_config(&dir)).unwrap();

    let outcome = client
        .login(&LoginRequest::new("alice", "hunter2"), &CancellationToken::new())
        .await;

    assert!(outcome.ok);
    assert!(outcome.dry_run);
    assert_eq!(outcome.status, LoginStatus::Success);
    assert_eq!(
        outcome.cookies.unwrap().get(SESSION_COOKIE).map(String::as_str),
        Some(DRY_RUN_COOKIE)
    );

    let health = client.session_health().await;
    assert!(health.logged_in);
    assert!(health.last_login_at.is_some());
    assert_eq!(health.cookie_names, vec![SESSION_COOKIE]);

    let metrics = client.metrics().get_metrics().await;
    assert_eq!(metrics.logins_success, 1);
    assert!(client
        .metrics()
        .render_prometheus()
        .await
        .contains("reddit_logins_total{status=\"success\"} 1"));
}

#[tokio::test]
async fn test_session_survives_new_client_with_same_key() {
    let dir = tempfile::tempdir().unwrap();
    {
        let client = RedditClient::from_config(create_test_config(&dir)).unwrap();
        client
            .login(&LoginRequest::new("alice", "pw"), &CancellationToken::new())
            .await;
    }

    let reopened = RedditClient::from_config(create_test_config(&dir)).unwrap();
    assert!(reopened.session_health().await.logged_in);
}

#[test]
fn test_dry_run_login_from_sync_context() {
    let dir = tempfile::tempdir().unwrap();
    let client = RedditClient::from_config(create_test_config(&dir)).unwrap();

    let outcome = tokio_test::block_on(
        client.login(&LoginRequest::new("bob", "pw"), &CancellationToken::new()),
    );
    assert!(outcome.ok);
    assert!(tokio_test::block_on(client.session_health()).logged_in);
}

#[cfg(not(feature = "socks"))]
#[tokio::test]
async fn test_socks_candidate_rejected_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&dir);
    config.dry_run = false;
    // Unroutable: the request must fail on configuration before any connection attempt.
    config.reddit_base_url = "http://127.0.0.1:9".to_string();
    let client = RedditClient::from_config(config).unwrap();

    let request = LoginRequest::new("alice", "pw").with_proxies(
        vec![
            ProxyConfig::new("10.0.0.1", 3128, ProxyScheme::Http),
            ProxyConfig::new("10.0.0.2", 1080, ProxyScheme::Socks5),
        ],
        RotationMode::Sequential,
    );
    let outcome = client.login(&request, &CancellationToken::new()).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, LoginStatus::Error);
    assert!(outcome
        .error
        .unwrap()
        .contains("SOCKS support is not compiled in"));
    assert!(outcome.proxy_info.is_none());
    assert_eq!(client.metrics().get_metrics().await.logins_error, 1);
}
