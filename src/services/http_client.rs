//! Outbound HTTP with bounded retries.
//!
//! Every call is limited by a per-try timeout and by an overall deadline that
//! also covers the sleeps between attempts. 429/503 responses honour a
//! `Retry-After` header given in seconds; everything retryable otherwise
//! backs off exponentially with ±50% jitter.

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::Instant;

/// Upstream error bodies are cut to this many characters before being stored.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Largest successful response body accepted from the detection API.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Retry and timeout policy for a single [`BackoffHttpClient::fetch`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Retries after the first attempt.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub per_try_timeout: Duration,
    /// Bound on the whole call, sleeps included.
    pub total_deadline: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            per_try_timeout: Duration::from_secs(10),
            total_deadline: Duration::from_secs(25),
        }
    }
}

impl FetchConfig {
    /// `min(base * 2^attempt, max)` for a 0-indexed attempt, without jitter.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        // Shifts past 31 saturate instead of overflowing.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Exponential delay scaled by a random factor in [0.5, 1.5), never above `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped = self.exponential_delay(attempt);
        if capped.is_zero() {
            return capped;
        }
        let factor = rand::rng().random_range(0.5..1.5);
        capped.mul_f64(factor).min(self.max_delay)
    }
}

/// HTTP client that retries transient failures within a deadline.
///
/// Holds no per-call state, so one instance can serve concurrent callers.
#[derive(Clone)]
pub struct BackoffHttpClient {
    http: Client,
}

struct AttemptFailure {
    error: FetchError,
    retry_after: Option<Duration>,
}

impl BackoffHttpClient {
    pub fn new() -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("shadowban-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// GET `url` and return the body of the first 2xx response.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        config: &FetchConfig,
    ) -> Result<String, FetchError> {
        let started = Instant::now();
        let mut last_error: Option<String> = None;

        for attempt in 0..=config.retries {
            let remaining = config.total_deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(FetchError::deadline(config, last_error));
            }

            let try_timeout = config.per_try_timeout.min(remaining);
            let outcome = match tokio::time::timeout(try_timeout, self.attempt(url, headers)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptFailure {
                    error: FetchError::Timeout { after: try_timeout },
                    retry_after: None,
                }),
            };

            let failure = match outcome {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            if !failure.error.is_retryable() || attempt == config.retries {
                return Err(failure.error);
            }

            let delay = match failure.retry_after {
                Some(wait) => wait.min(config.max_delay),
                None => config.backoff_delay(attempt),
            };

            let remaining = config.total_deadline.saturating_sub(started.elapsed());
            if delay >= remaining {
                return Err(FetchError::deadline(config, Some(failure.error.to_string())));
            }

            tracing::warn!(
                url = %url,
                attempt = attempt + 1,
                max = config.retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure.error,
                "Retrying detection API call after transient error"
            );
            metrics::counter!("shadowban_fetch_retries_total").increment(1);

            last_error = Some(failure.error.to_string());
            tokio::time::sleep(delay).await;
        }

        Err(FetchError::deadline(config, last_error))
    }

    async fn attempt(&self, url: &str, headers: &HeaderMap) -> Result<String, AttemptFailure> {
        let response = self
            .http
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(AttemptFailure::transport)?;

        let status = response.status();
        if status.is_success() {
            return read_capped(response, MAX_BODY_BYTES).await;
        }

        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::SERVICE_UNAVAILABLE
        {
            parse_retry_after(response.headers())
        } else {
            None
        };

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();

        Err(AttemptFailure {
            error: FetchError::Status {
                status: status.as_u16(),
                body,
            },
            retry_after,
        })
    }
}

impl AttemptFailure {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            error: FetchError::Transport(err),
            retry_after: None,
        }
    }
}

/// Read the body chunk by chunk, giving up once it passes `limit` bytes.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<String, AttemptFailure> {
    let too_large = || AttemptFailure {
        error: FetchError::BodyTooLarge { limit },
        retry_after: None,
    };

    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(AttemptFailure::transport)? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Read a `Retry-After` header expressed in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("detection API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("deadline of {deadline:?} exceeded (last error: {last_error})")]
    DeadlineExceeded { deadline: Duration, last_error: String },

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl FetchError {
    fn deadline(config: &FetchConfig, last_error: Option<String>) -> Self {
        FetchError::DeadlineExceeded {
            deadline: config.total_deadline,
            last_error: last_error.unwrap_or_else(|| "none".to_string()),
        }
    }

    /// Transport errors, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Transport(_) | FetchError::Timeout { .. } => true,
            FetchError::DeadlineExceeded { .. } | FetchError::BodyTooLarge { .. } => false,
        }
    }
}
