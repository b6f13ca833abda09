//! Webhook progress reporting.
//!
//! Every orchestrator step is pushed to the caller's optional webhook as a
//! [`StatusEvent`]. A webhook is considered to have accepted an event only when
//! it answers `200` with a JSON body; the body's `status_url` field (if any) is
//! handed back so the entrypoint can return it to the HTTP caller.

use crate::config::Timings;
use skyforge_common::StatusEvent;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one `report` call, after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub success: bool,
    /// `status_url` echoed by the webhook, empty when none was returned.
    pub status_url: String,
    /// Number of POST attempts made (0 when no webhook is configured).
    pub attempts: u32,
    pub error: Option<String>,
}

impl ReportOutcome {
    fn skipped() -> Self {
        Self {
            success: true,
            status_url: String::new(),
            attempts: 0,
            error: None,
        }
    }
}

/// Sends [`StatusEvent`]s to a webhook with bounded, linearly backed-off retries.
///
/// Stateless apart from the pooled HTTP client; cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    client: reqwest::Client,
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

impl StatusReporter {
    pub fn new(timings: &Timings) -> Self {
        Self::with_policy(
            timings.webhook_attempts,
            timings.webhook_backoff,
            timings.webhook_timeout,
        )
    }

    /// `backoff` is multiplied by the attempt number between retries.
    pub fn with_policy(attempts: u32, backoff: Duration, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            attempts: attempts.max(1),
            backoff,
            timeout,
        }
    }

    /// Total time spent sleeping between attempts if every attempt fails.
    pub fn worst_case_backoff(&self) -> Duration {
        (1..self.attempts).map(|attempt| self.backoff * attempt).sum()
    }

    /// Post `event` to `webhook_url`.
    ///
    /// An empty URL is an immediate success without any network call. Never
    /// returns an error; failures are described by the outcome.
    pub async fn report(&self, webhook_url: &str, event: &StatusEvent) -> ReportOutcome {
        if webhook_url.trim().is_empty() {
            return ReportOutcome::skipped();
        }

        info!(step = %event.step(), status = %event.status, "Sending status update");
        let body = event.to_json();
        let mut last_error = String::from("Unknown error");

        for attempt in 1..=self.attempts {
            match self.post_once(webhook_url, &body).await {
                Ok(status_url) => {
                    debug!(attempt, "Status update accepted");
                    return ReportOutcome {
                        success: true,
                        status_url,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => last_error = e,
            }

            if attempt < self.attempts {
                warn!(
                    attempt,
                    max = self.attempts,
                    error = %last_error,
                    "Status update failed, retrying"
                );
                tokio::time::sleep(self.backoff * attempt).await;
            } else {
                warn!(
                    attempts = self.attempts,
                    error = %last_error,
                    "Status update failed after all attempts"
                );
            }
        }

        ReportOutcome {
            success: false,
            status_url: String::new(),
            attempts: self.attempts,
            error: Some(last_error),
        }
    }

    async fn post_once(&self, url: &str, body: &serde_json::Value) -> Result<String, String> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Timed out after {}s", self.timeout.as_secs_f32())
                } else {
                    e.to_string()
                }
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Unexpected error: {}", e))?;
        Ok(data
            .get("status_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
