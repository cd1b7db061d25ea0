use outreach_core::{CaptchaError, CoreError, ErrorExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_POLLS: u32 = 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TASK_TYPE: &str = "HCaptchaTaskProxyless";

#[derive(Clone)]
pub struct CaptchaConfig {
    /// Solver credential. `None` disables solving entirely.
    pub api_key: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl CaptchaConfig {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }
}

impl std::fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .field("max_polls", &self.max_polls)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest<'a> {
    client_key: &'a str,
    task: TaskSpec<'a>,
}

#[derive(Debug, Serialize)]
struct TaskSpec<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "websiteURL")]
    website_url: &'a str,
    #[serde(rename = "websiteKey")]
    website_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    error_id: Option<i64>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultRequest<'a> {
    client_key: &'a str,
    task_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Solution>,
    #[serde(default)]
    error_id: Option<i64>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Solution {
    #[serde(default, rename = "gRecaptchaResponse")]
    g_recaptcha_response: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl Solution {
    /// First non-empty of the two known token fields.
    fn into_token(self) -> Option<String> {
        [self.g_recaptcha_response, self.token]
            .into_iter()
            .flatten()
            .find(|token| !token.is_empty())
    }
}

/// Client for the external challenge-solving service.
#[derive(Debug, Clone)]
pub struct CaptchaSolver {
    http_client: Client,
    config: CaptchaConfig,
}

impl CaptchaSolver {
    pub fn new(config: CaptchaConfig) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::from_transport(e, None))?;
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Solve a challenge, or `None` if the solver is disabled, fails, runs out
    /// of polls or is cancelled. Callers proceed without a token on `None`.
    pub async fn solve(
        &self,
        site_key: &str,
        page_url: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        match self.try_solve(site_key, page_url, cancel).await {
            Ok(token) => Some(token),
            Err(CaptchaError::Disabled) => {
                debug!("Captcha solver disabled; continuing without a token");
                None
            }
            Err(error) => {
                error.log_warn();
                None
            }
        }
    }

    pub async fn try_solve(
        &self,
        site_key: &str,
        page_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CaptchaError> {
        let api_key = self.config.api_key.as_deref().ok_or(CaptchaError::Disabled)?;

        let task_id = self.create_task(api_key, site_key, page_url).await?;
        info!("Captcha task {} created for {}", task_id, page_url);

        for attempt in 1..=self.config.max_polls {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Captcha task {} cancelled after {} polls", task_id, attempt - 1);
                    return Err(CaptchaError::Cancelled);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let result = self.poll_task(api_key, &task_id).await?;
            if let Some(error_id) = result.error_id.filter(|id| *id != 0) {
                return Err(CaptchaError::TaskFailed {
                    task_id,
                    reason: result
                        .error_description
                        .unwrap_or_else(|| format!("error id {}", error_id)),
                });
            }

            match result.status.as_deref() {
                Some("ready") => {
                    debug!("Captcha task {} ready after {} polls", task_id, attempt);
                    return result
                        .solution
                        .unwrap_or_default()
                        .into_token()
                        .ok_or(CaptchaError::EmptySolution { task_id });
                }
                Some("failed") => {
                    return Err(CaptchaError::TaskFailed {
                        task_id,
                        reason: result
                            .error_description
                            .unwrap_or_else(|| "task failed".to_string()),
                    });
                }
                status => {
                    debug!(
                        "Captcha task {} poll {}/{}: {:?}",
                        task_id, attempt, self.config.max_polls, status
                    );
                }
            }
        }

        warn!(
            "Captcha task {} not ready after {} polls",
            task_id, self.config.max_polls
        );
        Err(CaptchaError::PollExhausted {
            task_id,
            attempts: self.config.max_polls,
        })
    }

    async fn create_task(
        &self,
        api_key: &str,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, CaptchaError> {
        let request = CreateTaskRequest {
            client_key: api_key,
            task: TaskSpec {
                kind: TASK_TYPE,
                website_url: page_url,
                website_key: site_key,
            },
        };

        let response: CreateTaskResponse = self
            .post_json(&format!("{}/createTask", self.config.base_url), &request)
            .await?;

        match response.task_id.filter(|id| !id.is_empty()) {
            Some(task_id) => Ok(task_id),
            None => Err(CaptchaError::TaskCreationFailed {
                reason: response.error_description.unwrap_or_else(|| {
                    format!("no task id returned (error id {:?})", response.error_id)
                }),
            }),
        }
    }

    async fn poll_task(
        &self,
        api_key: &str,
        task_id: &str,
    ) -> Result<TaskResultResponse, CaptchaError> {
        let request = TaskResultRequest {
            client_key: api_key,
            task_id,
        };
        self.post_json(&format!("{}/getTaskResult", self.config.base_url), &request)
            .await
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, CaptchaError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let transport = |e: reqwest::Error| CaptchaError::Transport {
            reason: e.to_string(),
        };
        self.http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?
            .json::<R>()
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_prefers_first_non_empty_field() {
        let solution = Solution {
            g_recaptcha_response: Some(String::new()),
            token: Some("tok".to_string()),
        };
        assert_eq!(solution.into_token().as_deref(), Some("tok"));

        let solution = Solution {
            g_recaptcha_response: Some("grec".to_string()),
            token: Some("tok".to_string()),
        };
        assert_eq!(solution.into_token().as_deref(), Some("grec"));

        assert_eq!(Solution::default().into_token(), None);
    }

    #[test]
    fn test_blank_api_key_disables_solver() {
        let config = CaptchaConfig::new(Some("  ".to_string()), "https://solver.example/");
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url, "https://solver.example");
        assert_eq!(config.max_polls, 60);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_disabled_solver_returns_none_immediately() {
        let solver = CaptchaSolver::new(CaptchaConfig::new(None, "http://127.0.0.1:9")).unwrap();
        assert!(!solver.is_enabled());

        let cancel = CancellationToken::new();
        assert_eq!(solver.solve("site", "https://page", &cancel).await, None);
        assert_eq!(
            solver.try_solve("site", "https://page", &cancel).await,
            Err(CaptchaError::Disabled)
        );
    }

    #[test]
    fn test_create_task_payload_shape() {
        let request = CreateTaskRequest {
            client_key: "key",
            task: TaskSpec {
                kind: TASK_TYPE,
                website_url: "https://www.reddit.com/login",
                website_key: "site",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["clientKey"], "key");
        assert_eq!(json["task"]["type"], "HCaptchaTaskProxyless");
        assert_eq!(json["task"]["websiteURL"], "https://www.reddit.com/login");
        assert_eq!(json["task"]["websiteKey"], "site");
    }
}
