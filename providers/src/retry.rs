//! Connection-level retry for the streaming POST.
//!
//! Only the request/response handshake is retried. Once a success status has
//! been received and bytes start flowing, a failure is final for that run;
//! retrying a generation is the caller's decision.
//!
//! - Retries: 2 (3 attempts total), exponential backoff from 500ms capped at 8s
//! - Down-jitter up to 25%
//! - Retryable: 408, 409, 429, 5xx, connect/timeout errors
//! - `Retry-After-Ms` / `Retry-After` headers win over the computed backoff

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0.25 = delay reduced by up to 25%.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff. Useful against local mock servers.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Server-requested delay, accepted only in `(0, 60s)`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let in_range = |d: Duration| d > Duration::ZERO && d < Duration::from_secs(60);

    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
    {
        let delay = Duration::from_secs_f64(ms / 1000.0);
        if in_range(delay) {
            return Some(delay);
        }
    }

    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .filter(|d| in_range(*d))
}

#[must_use]
pub fn should_retry(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

#[must_use]
pub fn retry_delay(attempt: u32, config: &RetryConfig, headers: Option<&HeaderMap>) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay;
    }

    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

/// Result of the handshake after retries are exhausted.
#[derive(Debug)]
pub enum RetryOutcome {
    /// 2xx response, body not yet read.
    Success(Response),
    /// Final non-2xx response, kept for its error body.
    HttpError(Response),
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
}

/// Send the request built by `build_request`, retrying per `config`.
pub async fn send_with_retry<F>(build_request: F, config: &RetryConfig) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let can_retry = attempt < config.max_retries;

        match build_request().send().await {
            Ok(response) if response.status().is_success() => {
                return RetryOutcome::Success(response);
            }
            Ok(response) => {
                let status = response.status();
                if !(can_retry && should_retry(status)) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = retry_delay(attempt, config, Some(response.headers()));
                tracing::debug!(
                    %status,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after error status"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if !(can_retry && is_retryable_error(&e)) {
                    return RetryOutcome::ConnectionError {
                        attempts: attempt + 1,
                        source: e,
                    };
                }
                let delay = retry_delay(attempt, config, None);
                tracing::debug!(
                    error = %e,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }

        attempt += 1;
    }
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}
