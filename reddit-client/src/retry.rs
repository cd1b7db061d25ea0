use outreach_core::{CoreError, RedditApiError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Unauthenticated listing and comment reads.
    pub fn public_read() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after a server-specified delay
    RetryWithDelay(Duration),
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::RedditApi(reddit_error) => match reddit_error {
            RedditApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            RedditApiError::ServerError { .. } | RedditApiError::RequestTimeout => {
                RetryStrategy::Retry
            }
            RedditApiError::AuthenticationFailed { .. }
            | RedditApiError::InvalidResponse { .. }
            | RedditApiError::UnexpectedStatus { .. }
            | RedditApiError::LoginPageUnavailable { .. }
            | RedditApiError::Forbidden { .. }
            | RedditApiError::CommunityNotFound { .. }
            | RedditApiError::PostNotFound { .. } => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        _ => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        Duration::from_millis(config.base_delay_ms)
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);

    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

/// Runs an operation until it succeeds, hits a non-retryable error, or runs
/// out of attempts. The last error is returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            let has_attempts_left = attempt + 1 < self.config.max_attempts;
            let delay = match get_retry_strategy(&error) {
                RetryStrategy::Retry if has_attempts_left => calculate_delay(attempt, &self.config),
                RetryStrategy::RetryWithDelay(delay) if has_attempts_left => {
                    delay.min(Duration::from_millis(self.config.max_delay_ms))
                }
                RetryStrategy::NoRetry => {
                    debug!("Not retrying {}: {}", operation_name, error);
                    return Err(error);
                }
                _ => {
                    warn!(
                        "{} failed after {} attempts: {}",
                        operation_name,
                        attempt + 1,
                        error
                    );
                    return Err(error);
                }
            };

            info!("Retrying {} in {:?} due to: {}", operation_name, delay, error);
            sleep(delay).await;
            attempt += 1;
        }
    }
}
