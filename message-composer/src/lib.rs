pub mod ledger;
pub mod suggest;

pub use ledger::{MessageLedger, SendRequest, SendResponse, MAX_MESSAGE_CHARS};
pub use suggest::{generate_suggestions, score_comments, Suggestion};

use outreach_core::{AggregatedUser, CoreError};

/// Produces opening messages for a discovered user.
pub trait MessageComposer {
    async fn compose(
        &self,
        user: &AggregatedUser,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>, CoreError>;
}

/// Fixed templates scored by a comment-length heuristic. No network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateComposer;

impl MessageComposer for TemplateComposer {
    async fn compose(
        &self,
        user: &AggregatedUser,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>, CoreError> {
        Ok(generate_suggestions(user, max_suggestions))
    }
}
