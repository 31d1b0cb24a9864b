//! Retry with exponential back-off and jitter for the provider clients.
//!
//! [`retry_with_backoff`] wraps one page fetch and retries on transient
//! errors (network failures, 5xx, 429). A 429 pushes the next delay up to
//! the configured rate-limited floor or the server's `Retry-After`,
//! whichever is larger. Malformed bodies and other client errors are
//! returned immediately.

use std::future::Future;
use std::time::Duration;

use lotdb_core::Provider;

use crate::error::ProviderError;

const MAX_DELAY_MS: u64 = 60_000;

/// Retry knobs shared by both provider clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Minimum delay after an HTTP 429.
    pub rate_limited_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            rate_limited_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// No retries, no waits. Used by tests.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            rate_limited_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), before jitter.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32, err: &ProviderError) -> u64 {
        let exponential = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(10))
            .min(MAX_DELAY_MS);
        match err {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => exponential
                .max(self.rate_limited_backoff_ms)
                .max(retry_after_secs.saturating_mul(1_000)),
            _ => exponential,
        }
    }
}

/// Returns `true` for errors worth retrying after a back-off delay.
///
/// **Retriable:** connect/timeout failures, HTTP 5xx, HTTP 429.
///
/// **Not retriable:** malformed bodies, other 4xx, bad base URLs.
pub(crate) fn is_retriable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status().is_some_and(|s| s.is_server_error())
        }
        ProviderError::UnexpectedStatus { status, .. } => *status >= 500,
        ProviderError::RateLimited { .. } => true,
        ProviderError::Malformed { .. }
        | ProviderError::Unavailable { .. }
        | ProviderError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts on
/// transient errors.
///
/// When retries run out on a transport or 5xx failure the result is
/// [`ProviderError::Unavailable`]; when they run out on a 429 the final
/// [`ProviderError::RateLimited`] is returned as-is. Either way the caller
/// sees a transient error and must not advance its cursor.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    provider: Provider,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    return Err(exhausted(provider, attempt + 1, err));
                }
                attempt += 1;
                let base = policy.base_delay_ms(attempt, &err);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = if matches!(err, ProviderError::RateLimited { .. }) {
                    // Never undercut the floor; jitter only upward.
                    (base as f64 * (1.0 + rand::random::<f64>() * 0.25)) as u64
                } else {
                    (base as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64
                };
                tracing::warn!(
                    %provider,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "transient provider error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

fn exhausted(provider: Provider, attempts: u32, last: ProviderError) -> ProviderError {
    match last {
        rate_limited @ ProviderError::RateLimited { .. } => rate_limited,
        other => ProviderError::Unavailable {
            provider,
            attempts,
            last_error: other.to_string(),
        },
    }
}
