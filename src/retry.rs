//! Shared retry-with-backoff policy for every outbound HTTP call.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - HTTP 403 with `x-ratelimit-remaining: 0` (GitHub's rate limit) → retry
//! - Network errors → retry
//! - Any other 4xx → fail immediately
//!
//! Delays grow exponentially from `base_delay`, are capped at
//! `max_delay`, and carry up to ±25% random jitter.

use anyhow::{anyhow, Result};
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

const JITTER: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum RetryError {
    /// Worth another attempt.
    Transient(anyhow::Error),
    /// Retrying cannot help.
    Fatal(anyhow::Error),
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(16) as i32);
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
        let jittered = (base * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RetryError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(RetryError::Fatal(e)) => return Err(e),
                Err(RetryError::Transient(e)) => {
                    if attempt >= self.max_attempts {
                        return Err(e.context(format!("{} failed after {} attempts", what, attempt)));
                    }
                    let delay = self.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{:#}", e),
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Whether an HTTP status (plus headers) is worth retrying.
pub fn is_retryable(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

/// Send a request built fresh by `build` for every attempt. Returns the
/// first successful (2xx) response.
pub async fn send_with_retry<F>(policy: &RetryPolicy, what: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let build = &build;
    policy
        .run(what, move || async move {
            let response = match build().send().await {
                Ok(r) => r,
                Err(e) => return Err(RetryError::Transient(anyhow!(e))),
            };
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let retryable = is_retryable(status, response.headers());
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("{} returned {}: {}", what, status, truncate(&body, 300));
            if retryable {
                Err(RetryError::Transient(err))
            } else {
                Err(RetryError::Fatal(err))
            }
        })
        .await
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
