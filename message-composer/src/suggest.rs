use outreach_core::{AggregatedUser, UserComment};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SUGGESTIONS: usize = 2;
const TOPIC_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub score: f64,
}

/// Shorter comments suggest a conversational user; more comments add a little.
pub fn score_comments(comments: &[UserComment]) -> f64 {
    if comments.is_empty() {
        return 0.3;
    }

    let count = comments.len();
    let total_chars: usize = comments.iter().map(|c| c.body.chars().count()).sum();
    let mean = total_chars as f64 / count as f64;

    let base = if mean < 200.0 { 0.8 } else { 0.6 };
    let score = (base + (0.02 * count as f64).min(0.2)).clamp(0.1, 1.0);
    (score * 100.0).round() / 100.0
}

/// Up to `max_suggestions` openers built around the user's longest comment.
pub fn generate_suggestions(user: &AggregatedUser, max_suggestions: usize) -> Vec<Suggestion> {
    let username = if user.username.is_empty() {
        "there"
    } else {
        user.username.as_str()
    };
    let topic: String = user
        .comments
        .iter()
        .reduce(|longest, c| {
            if c.body.chars().count() > longest.body.chars().count() {
                c
            } else {
                longest
            }
        })
        .map(|c| c.body.chars().take(TOPIC_CHARS).collect())
        .unwrap_or_default();
    let score = score_comments(&user.comments);

    let templates = [
        format!(
            "Hey u/{}, saw your recent comment about '{}'. Curious, what's your take on the trade-offs?",
            username, topic
        ),
        format!(
            "u/{} your insights stood out. If you had to pick one improvement for that, what would it be?",
            username
        ),
    ];

    templates
        .into_iter()
        .take(max_suggestions)
        .map(|text| Suggestion { text, score })
        .collect()
}
