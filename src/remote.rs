//! Shared remote-call policy for the embedding and chat clients.
//!
//! - [`RateLimiter`]: fixed window of N requests; callers sleep until the
//!   window resets once the quota is used up.
//! - [`RetryPolicy`]: exponential backoff with per-class retry budgets.
//! - [`classify`]: maps an HTTP failure onto a [`RemoteError`].
//! - [`HttpEndpoint`]: one authenticated JSON POST with no retries.
//!
//! Each client owns its own limiter and policy; nothing here is global.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RemoteError;

/// Longest provider message kept in an error.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Retry budget and backoff schedule for one client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `base · 2^(attempt-1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Whether to try again after `failures` consecutive failures ending in
    /// `err`. Rate limits and timeouts use the full budget; other transient
    /// failures get one retry.
    pub fn should_retry(&self, err: &RemoteError, failures: u32) -> bool {
        match err {
            RemoteError::RateLimited(_) | RemoteError::Timeout(_) => failures <= self.max_retries,
            RemoteError::Other { .. } if err.is_transient() => failures <= self.max_retries.min(1),
            _ => false,
        }
    }
}

/// Fixed-window request limiter.
///
/// The check and the reservation happen under one lock, so concurrent
/// callers can never overshoot the quota.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Window>,
}

struct Window {
    started: Instant,
    used: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Reserves one request slot, sleeping until the window resets if the
    /// quota is exhausted.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.started);
            if elapsed >= self.window {
                state.started = now;
                state.used = 0;
            }
            if state.used < self.max_requests {
                state.used += 1;
                return;
            }
            let wait = self.window - elapsed;
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Runs `op` under the limiter, a per-attempt timeout, and the retry policy.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut failures = 0u32;
    loop {
        limiter.acquire().await;
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(policy.timeout)),
        };
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        failures += 1;
        if !policy.should_retry(&err, failures) {
            return Err(err);
        }
        let delay = policy.backoff(failures);
        warn!(
            call = what,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "remote call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Maps a non-success HTTP status and body onto a [`RemoteError`].
pub fn classify(status: u16, body: &str) -> RemoteError {
    let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let lower = body.to_ascii_lowercase();
    match status {
        401 | 403 => RemoteError::Unauthorized(message),
        402 => RemoteError::QuotaExhausted(message),
        429 if lower.contains("quota") => RemoteError::QuotaExhausted(message),
        429 => RemoteError::RateLimited(message),
        _ if lower.contains("rate_limit") => RemoteError::RateLimited(message),
        _ if lower.contains("insufficient_quota") => RemoteError::QuotaExhausted(message),
        _ => RemoteError::Other {
            status: Some(status),
            message,
        },
    }
}

/// One remote JSON endpoint: URL, optional bearer key, and an HTTP client
/// whose timeout matches the caller's [`RetryPolicy`].
pub struct HttpEndpoint {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpEndpoint {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            api_key,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one JSON POST and returns the parsed JSON body. No retries.
    pub async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, RemoteError> {
        let mut request = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::other(format!("connection error ({}): {e}", self.url))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify(status.as_u16(), &body_text));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RemoteError::other(format!("invalid JSON response: {e}")))
    }
}
