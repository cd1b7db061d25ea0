use crate::types::LoginStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutreachMetrics {
    pub logins_success: u64,
    pub logins_failure: u64,
    pub logins_error: u64,
    pub messages_ok: u64,
    pub messages_error: u64,
    pub online_users: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub last_request_time: Option<SystemTime>,
    pub requests_by_endpoint: BTreeMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
}

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub success: bool,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Ok,
    Error,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            total_response_time: Duration::ZERO,
            min_response_time: Duration::MAX,
            max_response_time: Duration::ZERO,
        }
    }

    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.min_response_time = self.min_response_time.min(metrics.response_time);
        self.max_response_time = self.max_response_time.max(metrics.response_time);

        if metrics.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            self.total_response_time / self.request_count as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }
}

/// Process-wide counters. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<OutreachMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_login(&self, status: LoginStatus) {
        let mut metrics = self.metrics.write().await;
        match status {
            LoginStatus::Success => metrics.logins_success += 1,
            LoginStatus::Failure => metrics.logins_failure += 1,
            LoginStatus::Error => metrics.logins_error += 1,
        }
    }

    pub async fn record_message(&self, status: MessageStatus) {
        let mut metrics = self.metrics.write().await;
        match status {
            MessageStatus::Ok => metrics.messages_ok += 1,
            MessageStatus::Error => metrics.messages_error += 1,
        }
    }

    pub async fn set_online_users(&self, count: usize) {
        self.metrics.write().await.online_users = count as u64;
    }

    pub async fn record_request(&self, request_metrics: RequestMetrics) {
        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;
        metrics.last_request_time = Some(SystemTime::now());

        if request_metrics.success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        if request_metrics.rate_limited {
            metrics.rate_limited_requests += 1;
        }

        metrics
            .requests_by_endpoint
            .entry(request_metrics.endpoint.clone())
            .or_insert_with(EndpointMetrics::new)
            .update(&request_metrics);
    }

    pub async fn get_metrics(&self) -> OutreachMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn get_endpoint_metrics(&self, endpoint: &str) -> Option<EndpointMetrics> {
        let metrics = self.metrics.read().await;
        metrics.requests_by_endpoint.get(endpoint).cloned()
    }

    pub async fn reset_metrics(&self) {
        let mut metrics = self.metrics.write().await;
        *metrics = OutreachMetrics::default();
    }

    pub async fn export_metrics(&self) -> Result<String, serde_json::Error> {
        let metrics = self.get_metrics().await;
        serde_json::to_string_pretty(&metrics)
    }

    /// Prometheus text exposition of the counters.
    pub async fn render_prometheus(&self) -> String {
        let metrics = self.get_metrics().await;
        let mut out = String::new();

        let _ = writeln!(out, "# TYPE reddit_logins_total counter");
        for (status, value) in [
            (LoginStatus::Success, metrics.logins_success),
            (LoginStatus::Failure, metrics.logins_failure),
            (LoginStatus::Error, metrics.logins_error),
        ] {
            let _ = writeln!(out, "reddit_logins_total{{status=\"{}\"}} {}", status, value);
        }

        let _ = writeln!(out, "# TYPE messages_processed_total counter");
        let _ = writeln!(
            out,
            "messages_processed_total{{status=\"ok\"}} {}",
            metrics.messages_ok
        );
        let _ = writeln!(
            out,
            "messages_processed_total{{status=\"error\"}} {}",
            metrics.messages_error
        );

        let _ = writeln!(out, "# TYPE online_users gauge");
        let _ = writeln!(out, "online_users {}", metrics.online_users);

        let _ = writeln!(out, "# TYPE request_latency_seconds summary");
        for (endpoint, endpoint_metrics) in &metrics.requests_by_endpoint {
            let _ = writeln!(
                out,
                "request_latency_seconds_sum{{endpoint=\"{}\"}} {:.6}",
                endpoint,
                endpoint_metrics.total_response_time.as_secs_f64()
            );
            let _ = writeln!(
                out,
                "request_latency_seconds_count{{endpoint=\"{}\"}} {}",
                endpoint, endpoint_metrics.request_count
            );
        }

        out
    }
}
