use crate::error::*;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

/// Signatures reqwest produces when a proxy needs SOCKS support that was not compiled in.
const MISSING_SOCKS_SIGNATURES: &[&str] = &[
    "missing dependencies for socks support",
    "socks support",
    "unknown proxy scheme",
];

/// Returns true if an error message reads like a missing SOCKS capability
/// rather than an ordinary connection failure.
pub fn is_missing_socks_support(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    MISSING_SOCKS_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

impl CoreError {
    /// Classify a transport failure. `proxy` names the egress in use, if any,
    /// so a missing SOCKS capability can be reported against it.
    pub fn from_transport(error: reqwest::Error, proxy: Option<&str>) -> Self {
        let chain = error_chain_text(&error);

        if let Some(proxy) = proxy {
            if is_missing_socks_support(&chain) {
                return CoreError::Config(ConfigError::SocksUnsupported {
                    proxy: proxy.to_string(),
                });
            }
        }

        if error.is_timeout() {
            return CoreError::RedditApi(RedditApiError::RequestTimeout);
        }

        CoreError::Network(error)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, CoreError::Config(_))
    }
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::RedditApi(e) => {
                error!("Reddit API error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            CoreError::Captcha(e) => {
                error!("Captcha error details: {:?}", e);
            }
            CoreError::Session(e) => {
                error!("Session store error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => e.is_retryable(),
            CoreError::Captcha(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(e) => e.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::RedditApi(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Captcha(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your connection or proxy.".to_string()
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            CoreError::Cancelled => "The operation was cancelled.".to_string(),
            CoreError::Message(e) => e.to_string(),
            CoreError::Session(_) => {
                "The session could not be saved. Check the state file location.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::RedditApi(_) => "REDDIT_API".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Captcha(_) => "CAPTCHA".to_string(),
            CoreError::Session(_) => "SESSION".to_string(),
            CoreError::Message(_) => "MESSAGE".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Cancelled => "CANCELLED".to_string(),
        }
    }
}

impl ErrorExt for RedditApiError {
    fn log_error(&self) -> &Self {
        error!("RedditApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("RedditApiError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            RedditApiError::RateLimitExceeded { .. } => true,
            RedditApiError::RequestTimeout => true,
            RedditApiError::ServerError { status_code } => *status_code >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            RedditApiError::AuthenticationFailed { .. } => {
                "Reddit login failed. Please check your credentials.".to_string()
            }
            RedditApiError::LoginPageUnavailable { status_code } => format!(
                "Reddit login page returned HTTP {}. Try again or use another proxy.",
                status_code
            ),
            RedditApiError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after
            ),
            RedditApiError::Forbidden { resource } => format!(
                "Access denied to {}. The community may be private or quarantined.",
                resource
            ),
            RedditApiError::CommunityNotFound { community } => {
                format!("Community '{}' not found or is private.", community)
            }
            RedditApiError::PostNotFound { .. } => {
                "The requested post could not be found.".to_string()
            }
            RedditApiError::RequestTimeout => {
                "Request to Reddit timed out. Please try again.".to_string()
            }
            _ => "Reddit API error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED".to_string(),
            RedditApiError::LoginPageUnavailable { .. } => {
                "REDDIT_LOGIN_PAGE_UNAVAILABLE".to_string()
            }
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT".to_string(),
            RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN".to_string(),
            RedditApiError::CommunityNotFound { .. } => "REDDIT_COMMUNITY_NOT_FOUND".to_string(),
            RedditApiError::PostNotFound { .. } => "REDDIT_POST_NOT_FOUND".to_string(),
            RedditApiError::RequestTimeout => "REDDIT_TIMEOUT".to_string(),
            RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE".to_string(),
            RedditApiError::UnexpectedStatus { .. } => "REDDIT_UNEXPECTED_STATUS".to_string(),
            RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidFormat { .. } => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::InvalidProxy { proxy, reason } => {
                format!("Proxy '{}' is not usable: {}.", proxy, reason)
            }
            ConfigError::SocksUnsupported { proxy } => format!(
                "Proxy '{}' needs SOCKS5 support, which this build does not include.",
                proxy
            ),
            ConfigError::InvalidEncryptionKey => {
                "The session encryption key is not a valid key.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidFormat { .. } => "CONFIG_INVALID_FORMAT".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::InvalidProxy { .. } => "CONFIG_INVALID_PROXY".to_string(),
            ConfigError::SocksUnsupported { .. } => "CONFIG_SOCKS_UNSUPPORTED".to_string(),
            ConfigError::InvalidEncryptionKey => "CONFIG_INVALID_ENCRYPTION_KEY".to_string(),
        }
    }
}

impl ErrorExt for CaptchaError {
    fn log_error(&self) -> &Self {
        error!("CaptchaError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CaptchaError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptchaError::Transport { .. } | CaptchaError::PollExhausted { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        if self.is_retryable() {
            Some(Duration::from_secs(2))
        } else {
            None
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CaptchaError::Disabled => "Captcha solving is not configured.".to_string(),
            CaptchaError::PollExhausted { .. } => {
                "The captcha service did not return a solution in time.".to_string()
            }
            CaptchaError::Cancelled => "Captcha solving was cancelled.".to_string(),
            _ => "The captcha service could not solve the challenge.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CaptchaError::Disabled => "CAPTCHA_DISABLED".to_string(),
            CaptchaError::TaskCreationFailed { .. } => "CAPTCHA_TASK_CREATION_FAILED".to_string(),
            CaptchaError::TaskFailed { .. } => "CAPTCHA_TASK_FAILED".to_string(),
            CaptchaError::PollExhausted { .. } => "CAPTCHA_POLL_EXHAUSTED".to_string(),
            CaptchaError::EmptySolution { .. } => "CAPTCHA_EMPTY_SOLUTION".to_string(),
            CaptchaError::Cancelled => "CAPTCHA_CANCELLED".to_string(),
            CaptchaError::Transport { .. } => "CAPTCHA_TRANSPORT".to_string(),
        }
    }
}

/// Logs a fatal error with its code and the message meant for the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn report_error(&self, error: &CoreError) {
        error.log_error();
        info!(
            code = %error.error_code(),
            "{}",
            error.user_friendly_message()
        );
        if let Some(retry_after) = error.retry_after() {
            info!("Error is retryable. Retry after: {:?}", retry_after);
        }
    }
}
