//! Finds accounts recently active in a community from its public feed.
//!
//! The pipeline fetches the newest posts, fans out to their comment threads
//! with bounded concurrency, and reduces the comments to one summary per
//! author. Comment threads are consumed in post order regardless of which
//! fetch finishes first, so ties in the final ranking keep a stable order.

use crate::api::RedditApiClient;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use outreach_core::{
    AggregatedUser, CoreError, DiscoveryRequest, MetricsCollector, RawComment, RawPost,
    UserComment,
};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

pub const MAX_BODY_CHARS: usize = 400;
pub const MAX_COMMENTS_PER_USER: usize = 3;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Read access to a community's public posts and comments.
pub trait CommunityFeed {
    async fn new_posts(&self, community: &str) -> Result<Vec<RawPost>, CoreError>;

    async fn comments(&self, post_id: &str) -> Result<Vec<RawComment>, CoreError>;
}

impl CommunityFeed for RedditApiClient {
    async fn new_posts(&self, community: &str) -> Result<Vec<RawPost>, CoreError> {
        let listing = self.get_new_posts(community).await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into())
            .collect())
    }

    async fn comments(&self, post_id: &str) -> Result<Vec<RawComment>, CoreError> {
        let comments = self.get_comments(post_id).await?;
        Ok(comments.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone)]
pub struct ActivityDiscoveryPipeline<F> {
    feed: F,
    concurrency: usize,
    permalink_base: String,
    metrics: Option<MetricsCollector>,
}

impl<F: CommunityFeed> ActivityDiscoveryPipeline<F> {
    /// `permalink_base` is prefixed to the relative permalinks the feed returns.
    pub fn new(feed: F, permalink_base: impl Into<String>) -> Self {
        Self {
            feed,
            concurrency: DEFAULT_CONCURRENCY,
            permalink_base: permalink_base.into().trim_end_matches('/').to_string(),
            metrics: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub async fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<AggregatedUser>, CoreError> {
        self.discover_at(request, epoch_now()).await
    }

    /// Same as `discover`, with an explicit "now" in epoch seconds.
    #[instrument(skip(self), fields(community = %request.community))]
    pub async fn discover_at(
        &self,
        request: &DiscoveryRequest,
        now: f64,
    ) -> Result<Vec<AggregatedUser>, CoreError> {
        let posts = self.feed.new_posts(&request.community).await?;
        debug!("Fetched {} posts", posts.len());

        let threads: Vec<(String, Result<Vec<RawComment>, CoreError>)> =
            stream::iter(posts.iter().filter(|post| !post.id.is_empty()))
                .map(|post| async move { (post.id.clone(), self.feed.comments(&post.id).await) })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut comments = Vec::new();
        let mut skipped = 0usize;
        for (post_id, result) in threads {
            match result {
                Ok(thread) => comments.extend(thread),
                Err(error) => {
                    skipped += 1;
                    warn!("Skipping comments for post {}: {}", post_id, error);
                }
            }
        }

        let users = aggregate(&comments, request, now, &self.permalink_base);
        info!(
            "Found {} active users from {} comments ({} posts skipped)",
            users.len(),
            comments.len(),
            skipped
        );

        if let Some(metrics) = &self.metrics {
            metrics.set_online_users(users.len()).await;
        }

        Ok(users)
    }
}

/// Absent, blank or placeholder authors do not count as activity.
pub fn is_real_author(author: Option<&str>) -> bool {
    match author {
        None => false,
        Some(author) => {
            let author = author.trim();
            !author.is_empty() && !author.starts_with("[deleted]") && author != "[removed]"
        }
    }
}

struct Bucket {
    username: String,
    last_active_utc: f64,
    comments: Vec<UserComment>,
}

/// Reduce comments to ranked per-author summaries.
///
/// Authors appear in first-seen order before ranking; the ranking sort is
/// stable, so equal `last_active_utc` values keep that order.
pub fn aggregate(
    comments: &[RawComment],
    request: &DiscoveryRequest,
    now: f64,
    permalink_base: &str,
) -> Vec<AggregatedUser> {
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for comment in comments {
        let Some(author) = comment.author.as_deref().filter(|a| is_real_author(Some(*a))) else {
            continue;
        };
        let created_utc = comment.created_at.unwrap_or(0.0);

        let slot = *index.entry(author).or_insert_with(|| {
            buckets.push(Bucket {
                username: author.to_string(),
                last_active_utc: 0.0,
                comments: Vec::new(),
            });
            buckets.len() - 1
        });

        let bucket = &mut buckets[slot];
        bucket.comments.push(UserComment {
            permalink: absolute_permalink(permalink_base, &comment.permalink),
            body: comment.body.chars().take(MAX_BODY_CHARS).collect(),
            created_utc,
        });
        bucket.last_active_utc = bucket.last_active_utc.max(created_utc);
    }

    let window = request.online_window_minutes as f64;
    let mut active: Vec<AggregatedUser> = buckets
        .into_iter()
        .filter(|bucket| bucket.last_active_utc > 0.0)
        .filter_map(|mut bucket| {
            let minutes = (now - bucket.last_active_utc) / 60.0;
            if minutes > window {
                return None;
            }

            bucket
                .comments
                .sort_by(|a, b| b.created_utc.total_cmp(&a.created_utc));
            bucket.comments.truncate(MAX_COMMENTS_PER_USER);

            Some(AggregatedUser {
                username: bucket.username,
                last_active_utc: bucket.last_active_utc,
                online_within_minutes: minutes.max(0.0).floor() as i64,
                comments: bucket.comments,
            })
        })
        .collect();

    active.sort_by(|a, b| b.last_active_utc.total_cmp(&a.last_active_utc));
    active.truncate(request.max_users);
    active
}

fn absolute_permalink(base: &str, permalink: &str) -> String {
    if permalink.starts_with("http://") || permalink.starts_with("https://") {
        permalink.to_string()
    } else {
        format!("{}{}", base, permalink)
    }
}

fn epoch_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
