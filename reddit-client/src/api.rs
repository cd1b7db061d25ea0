use crate::retry::{RetryConfig, RetryExecutor};
use outreach_core::{
    CoreError, MetricsCollector, RawComment, RawPost, RedditApiError, RequestMetrics,
};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const POSTS_PER_COMMUNITY: u32 = 25;
pub const COMMENTS_PER_POST: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: Option<String>,
    pub permalink: String,
    pub created_utc: Option<f64>,
    pub num_comments: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditCommentData {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub permalink: String,
    pub created_utc: Option<f64>,
}

/// Unauthenticated client for the public JSON listings.
#[derive(Debug, Clone)]
pub struct RedditApiClient {
    http_client: Client,
    base_url: String,
    metrics: MetricsCollector,
    retry: RetryExecutor,
}

impl RedditApiClient {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        metrics: MetricsCollector,
    ) -> Result<Self, CoreError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http_client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::from_transport(e, None))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics,
            retry: RetryExecutor::new(RetryConfig::public_read()),
        })
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `endpoint` and map non-success statuses onto `RedditApiError`.
    /// `not_found` is what a 404 means for this particular resource.
    async fn make_request(
        &self,
        endpoint: &str,
        query_params: &[(&str, String)],
        not_found: impl FnOnce() -> RedditApiError,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let start_time = Instant::now();

        debug!("Making Reddit read request: GET {}", endpoint);
        let result = self.http_client.get(&url).query(query_params).send().await;

        let (status_code, outcome) = match result {
            Ok(response) => {
                let status = response.status();
                (Some(status.as_u16()), classify_response(response, endpoint, not_found))
            }
            Err(e) => {
                error!("Network error for GET {}: {}", endpoint, e);
                (None, Err(CoreError::from_transport(e, None)))
            }
        };

        self.metrics
            .record_request(RequestMetrics {
                endpoint: metrics_label(endpoint),
                method: "GET".to_string(),
                status_code,
                response_time: start_time.elapsed(),
                success: outcome.is_ok(),
                rate_limited: status_code == Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            })
            .await;

        outcome
    }

    async fn fetch_new_posts_once(
        &self,
        community: &str,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let endpoint = format!("/{}/new.json", community);
        let response = self
            .make_request(
                &endpoint,
                &[("limit", POSTS_PER_COMMUNITY.to_string())],
                || RedditApiError::CommunityNotFound {
                    community: community.to_string(),
                },
            )
            .await?;

        response.json().await.map_err(|e| {
            error!("Failed to parse posts for {}: {}", community, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse posts for {}", community),
            })
        })
    }

    /// The newest posts of `community` (`r/<name>`).
    pub async fn get_new_posts(
        &self,
        community: &str,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let listing = self
            .retry
            .execute("fetch new posts", || self.fetch_new_posts_once(community))
            .await?;

        info!(
            "Retrieved {} posts from {}",
            listing.data.children.len(),
            community
        );
        Ok(listing)
    }

    async fn fetch_comments_once(&self, post_id: &str) -> Result<Vec<RedditCommentData>, CoreError> {
        let endpoint = format!("/comments/{}.json", post_id);
        let response = self
            .make_request(
                &endpoint,
                &[
                    ("limit", COMMENTS_PER_POST.to_string()),
                    ("sort", "new".to_string()),
                ],
                || RedditApiError::PostNotFound {
                    post_id: post_id.to_string(),
                },
            )
            .await?;

        let body: serde_json::Value = response.json().await.map_err(|e| {
            error!("Failed to parse comments for post {}: {}", post_id, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse comments for post {}", post_id),
            })
        })?;

        Ok(comments_from_thread(body))
    }

    /// Top-level comments of a post, newest first. "More" stubs are dropped.
    pub async fn get_comments(&self, post_id: &str) -> Result<Vec<RedditCommentData>, CoreError> {
        let comments = self
            .retry
            .execute("fetch comments", || self.fetch_comments_once(post_id))
            .await?;

        debug!("Retrieved {} comments for post {}", comments.len(), post_id);
        Ok(comments)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

fn classify_response(
    response: Response,
    endpoint: &str,
    not_found: impl FnOnce() -> RedditApiError,
) -> Result<Response, CoreError> {
    let status = response.status();
    if status.is_success() {
        debug!("Request successful: {} {}", status, endpoint);
        return Ok(response);
    }

    error!("Request failed with status: {} for {}", status, endpoint);
    let reddit_error = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER);
            warn!("Rate limited, retry after {} seconds", retry_after);
            RedditApiError::RateLimitExceeded { retry_after }
        }
        StatusCode::FORBIDDEN => RedditApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        StatusCode::NOT_FOUND => not_found(),
        status if status.is_server_error() => RedditApiError::ServerError {
            status_code: status.as_u16(),
        },
        status => RedditApiError::UnexpectedStatus {
            status_code: status.as_u16(),
            endpoint: endpoint.to_string(),
        },
    };
    Err(reddit_error.into())
}

/// Collapse per-id paths so metrics stay bounded.
fn metrics_label(endpoint: &str) -> String {
    if endpoint.starts_with("/comments/") {
        "/comments/{id}.json".to_string()
    } else {
        endpoint.to_string()
    }
}

/// A thread is `[post listing, comment listing]`; anything else has no comments.
fn comments_from_thread(body: serde_json::Value) -> Vec<RedditCommentData> {
    let Some(children) = body
        .get(1)
        .and_then(|listing| listing.get("data"))
        .and_then(|data| data.get("children"))
        .and_then(|children| children.as_array())
    else {
        return Vec::new();
    };

    children
        .iter()
        .filter(|child| child.get("kind").and_then(|kind| kind.as_str()) == Some("t1"))
        .filter_map(|child| child.get("data"))
        .filter_map(|data| serde_json::from_value(data.clone()).ok())
        .collect()
}

impl From<RedditPostData> for RawPost {
    fn from(post: RedditPostData) -> Self {
        Self {
            id: post.id,
            author: post.author.filter(|author| !author.is_empty()),
            body: if post.selftext.is_empty() {
                post.title
            } else {
                post.selftext
            },
            created_at: post.created_utc,
            permalink: post.permalink,
        }
    }
}

impl From<RedditCommentData> for RawComment {
    fn from(comment: RedditCommentData) -> Self {
        Self {
            id: comment.id,
            author: comment.author.filter(|author| !author.is_empty()),
            body: comment.body,
            created_at: comment.created_utc,
            permalink: comment.permalink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comments_from_thread_keeps_only_comments() {
        let body = json!([
            {"kind": "Listing", "data": {"children": [{"kind": "t3", "data": {"id": "p1"}}]}},
            {"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {"id": "c1", "author": "alice", "body": "hi",
                    "permalink": "/r/test/comments/p1/x/c1/", "created_utc": 1700000000.0}},
                {"kind": "more", "data": {"count": 12, "children": ["c9"]}},
                {"kind": "t1", "data": {"id": "c2", "author": null, "body": "[deleted]"}}
            ]}}
        ]);

        let comments = comments_from_thread(body);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].author.as_deref(), Some("alice"));
        assert_eq!(comments[0].created_utc, Some(1700000000.0));
        assert_eq!(comments[1].author, None);
        assert_eq!(comments[1].created_utc, None);
    }

    #[test]
    fn test_comments_from_unexpected_shape() {
        assert!(comments_from_thread(json!({"error": 404})).is_empty());
        assert!(comments_from_thread(json!([{"kind": "Listing"}])).is_empty());
    }

    #[test]
    fn test_post_listing_tolerates_missing_fields() {
        let listing: RedditListing<RedditPostData> = serde_json::from_value(json!({
            "kind": "Listing",
            "data": {"children": [{"kind": "t3", "data": {"id": "abc", "title": "Hello"}}]}
        }))
        .unwrap();

        let post: RawPost = listing.data.children[0].data.clone().into();
        assert_eq!(post.id, "abc");
        assert_eq!(post.body, "Hello");
        assert_eq!(post.author, None);
        assert_eq!(post.created_at, None);
    }

    #[test]
    fn test_comment_conversion_drops_empty_author() {
        let comment = RedditCommentData {
            id: "c1".to_string(),
            author: Some(String::new()),
            body: "text".to_string(),
            permalink: "/r/x/comments/1/_/c1/".to_string(),
            created_utc: Some(1.5),
        };
        let raw: RawComment = comment.into();
        assert_eq!(raw.author, None);
        assert_eq!(raw.created_at, Some(1.5));
    }

    #[test]
    fn test_metrics_label_collapses_post_ids() {
        assert_eq!(metrics_label("/comments/abc.json"), "/comments/{id}.json");
        assert_eq!(metrics_label("/r/rust/new.json"), "/r/rust/new.json");
    }
}
