//! Cookie-based web login.
//!
//! One call walks `SelectProxy -> FetchLoginPage -> SolveChallenge ->
//! SubmitCredentials -> Verify` strictly in order and never resumes a
//! previous attempt. Every outcome, including transport and configuration
//! problems, comes back as a [`LoginOutcome`]; nothing is thrown past
//! [`AuthenticationWorkflow::login`].

use crate::captcha::CaptchaSolver;
use crate::proxy_pool::{apply_proxy, ensure_supported, HttpLivenessProbe, ProxyRotationPool, PROBE_TIMEOUT};
use outreach_core::{
    AppConfig, CoreError, LoginOutcome, LoginRequest, LoginStatus, MetricsCollector, ProxyConfig,
    ProxyInfo, RedditApiError, RotationMode, SESSION_COOKIE,
};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{header, Client, StatusCode};
use session_store::SessionStore;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";
pub const DRY_RUN_COOKIE: &str = "dry-run-cookie";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const CSRF_COOKIE: &str = "csrf_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    SelectProxy,
    FetchLoginPage,
    SolveChallenge,
    SubmitCredentials,
    Verify,
    Persist,
}

impl LoginStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStep::SelectProxy => "select_proxy",
            LoginStep::FetchLoginPage => "fetch_login_page",
            LoginStep::SolveChallenge => "solve_challenge",
            LoginStep::SubmitCredentials => "submit_credentials",
            LoginStep::Verify => "verify",
            LoginStep::Persist => "persist",
        }
    }
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Site root, e.g. `https://www.reddit.com`. The login form lives at `/login`.
    pub base_url: String,
    pub dry_run: bool,
    /// Only a session cookie counts as success; a bare 200/302 does not.
    pub require_session_cookie: bool,
    pub captcha_site_key: Option<String>,
    pub ip_echo_url: String,
    pub use_default_proxies: bool,
    pub timeout: Duration,
}

impl AuthConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.reddit_base_url.trim_end_matches('/').to_string(),
            dry_run: config.dry_run,
            require_session_cookie: config.require_session_cookie,
            captcha_site_key: config
                .captcha_site_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            ip_echo_url: config.ip_echo_url.clone(),
            use_default_proxies: config.use_default_proxies,
            timeout: LOGIN_TIMEOUT,
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }
}

/// A failed step, plus whatever proxy metadata was known when it failed.
struct StepFailure {
    error: CoreError,
    proxy_info: Option<ProxyInfo>,
}

impl StepFailure {
    fn new(error: impl Into<CoreError>, proxy_info: &Option<ProxyInfo>) -> Self {
        Self {
            error: error.into(),
            proxy_info: proxy_info.clone(),
        }
    }
}

pub struct AuthenticationWorkflow {
    config: AuthConfig,
    default_pool: Arc<ProxyRotationPool>,
    probe: HttpLivenessProbe,
    captcha: CaptchaSolver,
    sessions: Arc<SessionStore>,
    metrics: MetricsCollector,
}

impl fmt::Debug for AuthenticationWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationWorkflow")
            .field("config", &self.config)
            .field("default_pool", &self.default_pool.len())
            .finish_non_exhaustive()
    }
}

impl AuthenticationWorkflow {
    pub fn new(
        config: AuthConfig,
        captcha: CaptchaSolver,
        sessions: Arc<SessionStore>,
        metrics: MetricsCollector,
    ) -> Self {
        let probe = HttpLivenessProbe::new(config.ip_echo_url.clone()).with_timeout(PROBE_TIMEOUT);
        Self {
            config,
            default_pool: Arc::new(ProxyRotationPool::default()),
            probe,
            captcha,
            sessions,
            metrics,
        }
    }

    /// Process-wide pool used when a request carries no candidates of its own.
    pub fn with_default_pool(mut self, pool: Arc<ProxyRotationPool>) -> Self {
        self.default_pool = pool;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn login(&self, request: &LoginRequest, cancel: &CancellationToken) -> LoginOutcome {
        let attempt_id = uuid::Uuid::new_v4();
        let span = info_span!("login", %attempt_id, username = %request.username);

        let outcome = async {
            if self.config.dry_run {
                return self.dry_run_login().await;
            }

            match self.run(request, cancel).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    let reason = failure_reason(&failure.error);
                    warn!("Login attempt ended with error: {}", reason);
                    LoginOutcome::error(reason, failure.proxy_info)
                }
            }
        }
        .instrument(span)
        .await;

        self.metrics.record_login(outcome.status).await;
        outcome
    }

    async fn dry_run_login(&self) -> LoginOutcome {
        let cookies = HashMap::from([(SESSION_COOKIE.to_string(), DRY_RUN_COOKIE.to_string())]);
        if let Err(error) = self.sessions.set_cookies(cookies.clone()).await {
            return LoginOutcome::error(failure_reason(&error), None);
        }

        info!("Dry run: stored placeholder session");
        LoginOutcome {
            ok: true,
            status: LoginStatus::Success,
            status_code: None,
            cookies: Some(cookies),
            error: None,
            proxy_info: None,
            dry_run: true,
        }
    }

    async fn run(
        &self,
        request: &LoginRequest,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, StepFailure> {
        let mut proxy_info: Option<ProxyInfo> = None;
        let login_url = self.config.login_url();
        let parse_url = |raw: &str| {
            Url::parse(raw).map_err(|e| {
                StepFailure::new(
                    CoreError::InvalidInput {
                        message: format!("invalid url {}: {}", raw, e),
                    },
                    &None,
                )
            })
        };
        let site_url = parse_url(&self.config.base_url)?;
        let login_page_url = parse_url(&login_url)?;
        let cookie_scopes = [&site_url, &login_page_url];

        debug!(step = %LoginStep::SelectProxy, "Selecting egress");
        let selected = cancellable(cancel, self.select_proxy(request))
            .await
            .map_err(|e| StepFailure::new(e, &proxy_info))?;
        if let Some((proxy, mode)) = &selected {
            info!("Using proxy {} ({})", proxy.endpoint(), mode);
            proxy_info = Some(ProxyInfo {
                proxy_config: proxy.clone(),
                proxy_ip: None,
                rotation_mode: *mode,
            });
        } else {
            debug!("No proxy selected; connecting directly");
        }
        let proxy = selected.as_ref().map(|(proxy, _)| proxy);
        let proxy_endpoint = proxy.map(|proxy| proxy.endpoint());

        let jar = Arc::new(Jar::default());
        let client = self
            .build_client(jar.clone(), proxy)
            .map_err(|e| StepFailure::new(e, &proxy_info))?;
        let transport = |e: reqwest::Error| CoreError::from_transport(e, proxy_endpoint.as_deref());

        debug!(step = %LoginStep::FetchLoginPage, "GET {}", login_url);
        let page = cancellable(cancel, async {
            client.get(&login_url).send().await.map_err(transport)
        })
        .await
        .map_err(|e| StepFailure::new(e, &proxy_info))?;

        let page_status = page.status();
        if !(page_status.is_success() || page_status.is_redirection()) {
            return Err(StepFailure::new(
                RedditApiError::LoginPageUnavailable {
                    status_code: page_status.as_u16(),
                },
                &proxy_info,
            ));
        }

        let csrf_token = cookies_for(&jar, &cookie_scopes)
            .remove(CSRF_COOKIE)
            .unwrap_or_default();
        if csrf_token.is_empty() {
            debug!("Login page set no {} cookie", CSRF_COOKIE);
        }

        let captcha_token = match &self.config.captcha_site_key {
            Some(site_key) => {
                debug!(step = %LoginStep::SolveChallenge, "Requesting challenge token");
                let token = self.captcha.solve(site_key, &login_url, cancel).await;
                if cancel.is_cancelled() {
                    return Err(StepFailure::new(CoreError::Cancelled, &proxy_info));
                }
                if token.is_none() {
                    info!("No challenge token; submitting without one");
                }
                token
            }
            None => None,
        };

        debug!(step = %LoginStep::SubmitCredentials, "POST {}", login_url);
        let form = [
            ("csrf_token", csrf_token.as_str()),
            ("otp", request.otp.as_deref().unwrap_or("")),
            ("password", request.password.as_str()),
            ("dest", self.config.base_url.as_str()),
            ("username", request.username.as_str()),
            ("captcha", captcha_token.as_deref().unwrap_or("")),
        ];
        let response = cancellable(cancel, async {
            client.post(&login_url).form(&form).send().await.map_err(transport)
        })
        .await
        .map_err(|e| StepFailure::new(e, &proxy_info))?;
        let status = response.status();

        let cookies = cookies_for(&jar, &cookie_scopes);
        let mut cookie_names: Vec<&str> = cookies.keys().map(String::as_str).collect();
        cookie_names.sort_unstable();
        debug!(step = %LoginStep::Verify, status = status.as_u16(), cookies = ?cookie_names, "Checking session");

        if !self.is_verified(&cookies, status) {
            let rejected = RedditApiError::AuthenticationFailed {
                reason: format!(
                    "login not confirmed: HTTP {} and no {} cookie",
                    status.as_u16(),
                    SESSION_COOKIE
                ),
            };
            info!("{}", rejected);
            return Ok(LoginOutcome {
                ok: false,
                status: LoginStatus::Failure,
                status_code: Some(status.as_u16()),
                cookies: Some(cookies),
                error: Some(rejected.to_string()),
                proxy_info,
                dry_run: false,
            });
        }

        debug!(step = %LoginStep::Persist, "Storing {} cookies", cookies.len());
        self.sessions
            .set_cookies(cookies.clone())
            .await
            .map_err(|e| StepFailure::new(e, &proxy_info))?;

        if let (Some(info), Some(proxy)) = (proxy_info.as_mut(), proxy) {
            info.proxy_ip = self.resolve_egress_ip(proxy).await;
        }

        info!("Login succeeded (HTTP {})", status.as_u16());
        Ok(LoginOutcome {
            ok: true,
            status: LoginStatus::Success,
            status_code: Some(status.as_u16()),
            cookies: Some(cookies),
            error: None,
            proxy_info,
            dry_run: false,
        })
    }

    /// Per-call candidates win; the default pool is used only when asked for.
    /// Every candidate is checked for support before any network call.
    async fn select_proxy(
        &self,
        request: &LoginRequest,
    ) -> Result<Option<(ProxyConfig, RotationMode)>, CoreError> {
        let mode = request.proxy_rotation_mode;

        if let Some(candidates) = request.proxies.as_ref().filter(|c| !c.is_empty()) {
            for candidate in candidates {
                ensure_supported(candidate)?;
            }
            let pool = ProxyRotationPool::new(candidates.clone());
            let chosen = pool.select(mode, &self.probe).await?;
            return Ok(chosen.map(|proxy| (proxy, mode)));
        }

        if (request.use_default_proxies || self.config.use_default_proxies)
            && !self.default_pool.is_empty()
        {
            for candidate in self.default_pool.proxies() {
                ensure_supported(candidate)?;
            }
            let chosen = self.default_pool.select(mode, &self.probe).await?;
            return Ok(chosen.map(|proxy| (proxy, mode)));
        }

        Ok(None)
    }

    fn build_client(&self, jar: Arc<Jar>, proxy: Option<&ProxyConfig>) -> Result<Client, CoreError> {
        let mut headers = header::HeaderMap::new();
        let login_url = self.config.login_url();
        if let Ok(referer) = header::HeaderValue::from_str(&login_url) {
            headers.insert(header::REFERER, referer);
        }
        if let Ok(origin) = header::HeaderValue::from_str(&self.config.base_url) {
            headers.insert(header::ORIGIN, origin);
        }

        let builder = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .cookie_provider(jar)
            .timeout(self.config.timeout);

        apply_proxy(builder, proxy)?
            .build()
            .map_err(|e| CoreError::from_transport(e, proxy.map(|p| p.endpoint()).as_deref()))
    }

    fn is_verified(&self, cookies: &HashMap<String, String>, status: StatusCode) -> bool {
        let has_session = cookies.contains_key(SESSION_COOKIE);
        if self.config.require_session_cookie {
            return has_session;
        }
        has_session || status == StatusCode::OK || status == StatusCode::FOUND
    }

    /// Apparent egress address through `proxy`. Annotation only; any failure is `None`.
    async fn resolve_egress_ip(&self, proxy: &ProxyConfig) -> Option<String> {
        let client = apply_proxy(Client::builder().timeout(PROBE_TIMEOUT), Some(proxy))
            .ok()?
            .build()
            .ok()?;

        let body: serde_json::Value = match client.get(&self.config.ip_echo_url).send().await {
            Ok(response) => response.json().await.ok()?,
            Err(e) => {
                debug!("IP echo through {} failed: {}", proxy.endpoint(), e);
                return None;
            }
        };

        body.get("origin")
            .and_then(|origin| origin.as_str())
            .map(str::to_string)
    }
}

/// Run `future` unless `cancel` fires first.
async fn cancellable<T, Fut>(cancel: &CancellationToken, future: Fut) -> Result<T, CoreError>
where
    Fut: Future<Output = Result<T, CoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = future => result,
    }
}

fn failure_reason(error: &CoreError) -> String {
    match error {
        CoreError::Cancelled => "cancelled".to_string(),
        CoreError::Config(config_error) => config_error.to_string(),
        other => other.to_string(),
    }
}

/// Cookies the jar would send to any of `urls`, as a name/value map.
/// A path-scoped cookie seen on a later url replaces a broader one of the same name.
pub fn cookies_for(jar: &Jar, urls: &[&Url]) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for url in urls {
        let Some(header) = jar.cookies(url) else {
            continue;
        };
        let Ok(header) = header.to_str() else {
            continue;
        };

        cookies.extend(header.split(';').filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        }));
    }
    cookies
}
