pub mod api;
pub mod auth;
pub mod captcha;
pub mod discovery;
pub mod proxy_pool;
pub mod retry;

#[cfg(test)]
mod tests;

pub use api::{RedditApiClient, RedditCommentData, RedditListing, RedditPostData};
pub use auth::{AuthConfig, AuthenticationWorkflow, LoginStep};
pub use captcha::{CaptchaConfig, CaptchaSolver};
pub use discovery::{aggregate, ActivityDiscoveryPipeline, CommunityFeed};
pub use proxy_pool::{HttpLivenessProbe, LivenessProbe, ProxyRotationPool};
pub use retry::{RetryConfig, RetryExecutor};

use outreach_core::{
    AggregatedUser, AppConfig, CoreError, DiscoveryRequest, LoginOutcome, LoginRequest,
    MetricsCollector, SessionHealth,
};
use session_store::SessionStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything a login or discovery call needs, wired from one `AppConfig`.
pub struct RedditClient {
    config: AppConfig,
    sessions: Arc<SessionStore>,
    metrics: MetricsCollector,
    auth: AuthenticationWorkflow,
    discovery: ActivityDiscoveryPipeline<RedditApiClient>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("sessions", &self.sessions)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl RedditClient {
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let metrics = MetricsCollector::new();
        let sessions = Arc::new(SessionStore::from_config(&config)?);

        let captcha = CaptchaSolver::new(CaptchaConfig::new(
            config.captcha_api_key.clone(),
            config.captcha_base_url.clone(),
        ))?;
        let default_pool = Arc::new(ProxyRotationPool::new(config.default_proxies.clone()));
        let auth = AuthenticationWorkflow::new(
            AuthConfig::from_app_config(&config),
            captcha,
            sessions.clone(),
            metrics.clone(),
        )
        .with_default_pool(default_pool);

        let api = RedditApiClient::new(&config.reddit_base_url, &config.user_agent, metrics.clone())?;
        let discovery = ActivityDiscoveryPipeline::new(api, config.reddit_base_url.clone())
            .with_concurrency(config.discovery_concurrency)
            .with_metrics(metrics.clone());

        info!(
            "Reddit client ready (dry_run={}, default proxies={}, state file={})",
            config.dry_run,
            config.default_proxies.len(),
            config.state_file.display()
        );

        Ok(Self {
            config,
            sessions,
            metrics,
            auth,
            discovery,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn login(&self, request: &LoginRequest, cancel: &CancellationToken) -> LoginOutcome {
        self.auth.login(request, cancel).await
    }

    pub async fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<AggregatedUser>, CoreError> {
        self.discovery.discover(request).await
    }

    /// Discovery with the configured window and user cap.
    pub async fn discover_community(&self, community: &str) -> Result<Vec<AggregatedUser>, CoreError> {
        let request = DiscoveryRequest::new(
            community,
            self.config.online_window_minutes,
            self.config.max_users,
        );
        self.discover(&request).await
    }

    pub async fn session_health(&self) -> SessionHealth {
        self.sessions.health().await
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}
