use chrono::{DateTime, Utc};
use outreach_core::{MessageError, MessageStatus, MetricsCollector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const DUPLICATE_REASON: &str = "duplicate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub username: String,
    pub message: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    username: String,
    message_chars: usize,
    recorded_at: DateTime<Utc>,
}

/// Records outgoing messages once per idempotency key.
#[derive(Debug, Default)]
pub struct MessageLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    metrics: MetricsCollector,
}

impl MessageLedger {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// A repeated key is accepted without a second effect. The duplicate check
    /// happens before validation, so a retried oversized message is also a no-op.
    pub async fn send(&self, request: &SendRequest) -> Result<SendResponse, MessageError> {
        let key = request.idempotency_key.trim();
        if key.is_empty() {
            return Err(MessageError::MissingIdempotencyKey);
        }

        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.get(key) {
            debug!(
                "Duplicate send for key {} (first recorded {} for u/{})",
                key, previous.recorded_at, previous.username
            );
            return Ok(SendResponse {
                accepted: true,
                reason: Some(DUPLICATE_REASON.to_string()),
            });
        }

        let length = request.message.chars().count();
        if length > MAX_MESSAGE_CHARS {
            warn!("Rejected message to u/{}: {} characters", request.username, length);
            self.metrics.record_message(MessageStatus::Error).await;
            return Err(MessageError::TooLong {
                length,
                max: MAX_MESSAGE_CHARS,
            });
        }

        entries.insert(
            key.to_string(),
            LedgerEntry {
                username: request.username.clone(),
                message_chars: length,
                recorded_at: Utc::now(),
            },
        );
        drop(entries);

        self.metrics.record_message(MessageStatus::Ok).await;
        info!("Recorded message to u/{} ({} chars)", request.username, length);
        Ok(SendResponse {
            accepted: true,
            reason: None,
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Total characters recorded for `username`.
    pub async fn chars_sent_to(&self, username: &str) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.username == username)
            .map(|entry| entry.message_chars)
            .sum()
    }
}
