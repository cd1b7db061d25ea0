//! Login workflow against a mock login endpoint.

use outreach_core::{
    LoginRequest, LoginStatus, MetricsCollector, ProxyConfig, ProxyScheme, RotationMode,
    SESSION_COOKIE,
};
use reddit_client::{
    AuthConfig, AuthenticationWorkflow, CaptchaConfig, CaptchaSolver, ProxyRotationPool,
};
use session_store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";

struct Harness {
    workflow: AuthenticationWorkflow,
    sessions: Arc<SessionStore>,
    metrics: MetricsCollector,
    _dir: tempfile::TempDir,
}

fn auth_config(server: &MockServer) -> AuthConfig {
    AuthConfig {
        base_url: server.uri(),
        dry_run: false,
        require_session_cookie: false,
        captcha_site_key: None,
        ip_echo_url: format!("{}/ip", server.uri()),
        use_default_proxies: false,
        timeout: Duration::from_secs(5),
    }
}

fn harness(config: AuthConfig, captcha: CaptchaConfig) -> Harness {
    harness_with_pool(config, captcha, ProxyRotationPool::default())
}

fn harness_with_pool(config: AuthConfig, captcha: CaptchaConfig, pool: ProxyRotationPool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::open(dir.path().join("state.enc"), Some(TEST_KEY)).unwrap());
    let metrics = MetricsCollector::new();
    let workflow = AuthenticationWorkflow::new(
        config,
        CaptchaSolver::new(captcha).unwrap(),
        sessions.clone(),
        metrics.clone(),
    )
    .with_default_pool(Arc::new(pool));
    Harness {
        workflow,
        sessions,
        metrics,
        _dir: dir,
    }
}

fn no_captcha() -> CaptchaConfig {
    CaptchaConfig::new(None, "http://127.0.0.1:9")
}

async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "csrf_token=tok123; Path=/")
                .set_body_string("<html>login</html>"),
        )
        .mount(server)
        .await;
}

mod successful_login {
    use super::*;

    #[tokio::test]
    async fn test_session_cookie_is_persisted() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("csrf_token=tok123"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("otp=123456"))
            .and(header("origin", server.uri().as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "reddit_session=sess-abc; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(auth_config(&server), no_captcha());
        let request = LoginRequest::new("alice", "hunter2").with_otp("123456");
        let outcome = h.workflow.login(&request, &CancellationToken::new()).await;

        assert!(outcome.ok, "unexpected outcome: {:?}", outcome.error);
        assert_eq!(outcome.status, LoginStatus::Success);
        assert_eq!(outcome.status_code, Some(200));
        assert!(!outcome.dry_run);
        assert!(outcome.proxy_info.is_none());

        let stored = h.sessions.cookies().await;
        assert_eq!(stored.get(SESSION_COOKIE).map(String::as_str), Some("sess-abc"));
        assert_eq!(stored.get("csrf_token").map(String::as_str), Some("tok123"));
        assert_eq!(h.metrics.get_metrics().await.logins_success, 1);
    }

    #[tokio::test]
    async fn test_bare_200_counts_as_success_by_default() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let h = harness(auth_config(&server), no_captcha());
        let outcome = h
            .workflow
            .login(&LoginRequest::new("bob", "pw"), &CancellationToken::new())
            .await;

        assert!(outcome.ok);
        assert!(h.sessions.health().await.logged_in);
    }

    #[tokio::test]
    async fn test_login_path_scoped_csrf_cookie_is_submitted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "csrf_token=scoped; Path=/login"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("csrf_token=scoped"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "reddit_session=s; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(auth_config(&server), no_captcha());
        let outcome = h
            .workflow
            .login(&LoginRequest::new("dave", "pw"), &CancellationToken::new())
            .await;

        assert!(outcome.ok, "unexpected outcome: {:?}", outcome.error);
        assert_eq!(
            outcome.cookies.unwrap().get("csrf_token").map(String::as_str),
            Some("scoped")
        );
    }

    #[tokio::test]
    async fn test_challenge_token_is_submitted() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;

        Mock::given(method("POST"))
            .and(path("/createTask"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errorId": 0, "taskId": "task-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errorId": 0, "status": "ready", "solution": {"gRecaptchaResponse": "solved-token"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("captcha=solved-token"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "reddit_session=s; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut config = auth_config(&server);
        config.captcha_site_key = Some("site-key".to_string());
        let mut captcha = CaptchaConfig::new(Some("solver-key".to_string()), server.uri());
        captcha.poll_interval = Duration::from_millis(10);

        let h = harness(config, captcha);
        let outcome = h
            .workflow
            .login(&LoginRequest::new("carol", "pw"), &CancellationToken::new())
            .await;
        assert!(outcome.ok);
    }
}

mod unsuccessful_login {
    use super::*;

    #[tokio::test]
    async fn test_rejected_credentials_are_a_failure() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(400).set_body_string("WRONG_PASSWORD"))
            .mount(&server)
            .await;

        let h = harness(auth_config(&server), no_captcha());
        let outcome = h
            .workflow
            .login(&LoginRequest::new("alice", "nope"), &CancellationToken::new())
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.status, LoginStatus::Failure);
        assert_eq!(outcome.status_code, Some(400));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Authentication failed: login not confirmed: HTTP 400 and no reddit_session cookie")
        );
        assert!(h.sessions.load().await.is_empty());
        assert_eq!(h.metrics.get_metrics().await.logins_failure, 1);
    }

    #[tokio::test]
    async fn test_required_session_cookie_rejects_bare_200() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut config = auth_config(&server);
        config.require_session_cookie = true;
        let h = harness(config, no_captcha());
        let outcome = h
            .workflow
            .login(&LoginRequest::new("alice", "pw"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, LoginStatus::Failure);
        assert!(outcome.error.unwrap().contains("HTTP 200 and no reddit_session cookie"));
        assert!(!h.sessions.health().await.logged_in);
    }

    #[tokio::test]
    async fn test_unavailable_login_page_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(auth_config(&server), no_captcha());
        let outcome = h
            .workflow
            .login(&LoginRequest::new("alice", "pw"), &CancellationToken::new())
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.status, LoginStatus::Error);
        assert!(outcome.error.unwrap().contains("503"));
        assert_eq!(h.metrics.get_metrics().await.logins_error, 1);
    }

    #[tokio::test]
    async fn test_cancelled_login_reports_cancelled() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;

        let h = harness(auth_config(&server), no_captcha());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.workflow.login(&LoginRequest::new("alice", "pw"), &cancel).await;
        assert_eq!(outcome.status, LoginStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("cancelled"));
        assert!(h.sessions.load().await.is_empty());
    }
}

/// The mock server doubles as an HTTP forward proxy: requests for the
/// unresolvable `reddit.test` and `echo.test` hosts only succeed through it.
mod proxied_login {
    use super::*;

    const EGRESS_IP: &str = "9.9.9.9";

    fn dead_proxy() -> ProxyConfig {
        ProxyConfig::new("127.0.0.1", 9, ProxyScheme::Http)
    }

    fn mock_proxy(server: &MockServer) -> ProxyConfig {
        ProxyConfig::new("127.0.0.1", server.address().port(), ProxyScheme::Http)
    }

    fn proxied_config(server: &MockServer) -> AuthConfig {
        AuthConfig {
            base_url: "http://reddit.test".to_string(),
            ip_echo_url: "http://echo.test/ip".to_string(),
            ..auth_config(server)
        }
    }

    async fn mount_site(server: &MockServer) {
        mount_login_page(server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "reddit_session=via-proxy; Path=/"),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"origin": EGRESS_IP})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_working_skips_dead_proxy_and_reports_egress() {
        let server = MockServer::start().await;
        mount_site(&server).await;

        let h = harness(proxied_config(&server), no_captcha());
        let request = LoginRequest::new("erin", "pw").with_proxies(
            vec![dead_proxy(), mock_proxy(&server)],
            RotationMode::FirstWorking,
        );
        let outcome = h.workflow.login(&request, &CancellationToken::new()).await;

        assert!(outcome.ok, "unexpected outcome: {:?}", outcome.error);
        let info = outcome.proxy_info.unwrap();
        assert_eq!(info.proxy_config.port, server.address().port());
        assert_eq!(info.proxy_ip.as_deref(), Some(EGRESS_IP));
        assert_eq!(info.rotation_mode, RotationMode::FirstWorking);

        // One liveness check plus one egress lookup, both through the live proxy.
        let echo_hits = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/ip")
            .count();
        assert_eq!(echo_hits, 2);
        assert_eq!(
            h.sessions.cookies().await.get(SESSION_COOKIE).map(String::as_str),
            Some("via-proxy")
        );
    }

    #[tokio::test]
    async fn test_default_pool_used_when_requested() {
        let server = MockServer::start().await;
        mount_site(&server).await;

        let h = harness_with_pool(
            proxied_config(&server),
            no_captcha(),
            ProxyRotationPool::new(vec![mock_proxy(&server)]),
        );
        let mut request = LoginRequest::new("frank", "pw");
        request.use_default_proxies = true;
        let outcome = h.workflow.login(&request, &CancellationToken::new()).await;

        assert!(outcome.ok, "unexpected outcome: {:?}", outcome.error);
        let info = outcome.proxy_info.unwrap();
        assert_eq!(info.proxy_config, mock_proxy(&server));
        assert_eq!(info.proxy_ip.as_deref(), Some(EGRESS_IP));
        assert_eq!(info.rotation_mode, RotationMode::Sequential);
    }

    #[tokio::test]
    async fn test_default_pool_ignored_unless_requested() {
        let server = MockServer::start().await;
        mount_site(&server).await;

        let h = harness_with_pool(
            auth_config(&server),
            no_captcha(),
            ProxyRotationPool::new(vec![dead_proxy()]),
        );
        let outcome = h
            .workflow
            .login(&LoginRequest::new("gina", "pw"), &CancellationToken::new())
            .await;

        assert!(outcome.ok, "unexpected outcome: {:?}", outcome.error);
        assert!(outcome.proxy_info.is_none());
    }
}
