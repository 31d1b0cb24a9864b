use lotdb_core::Provider;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {provider} (retry after {retry_after_secs}s)")]
    RateLimited {
        provider: Provider,
        retry_after_secs: u64,
    },

    #[error("unexpected HTTP status {status} from {provider} at {url}")]
    UnexpectedStatus {
        provider: Provider,
        status: u16,
        url: String,
    },

    #[error("malformed {provider} response for {context}: {reason}")]
    Malformed {
        provider: Provider,
        context: String,
        reason: String,
    },

    #[error("{provider} unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        provider: Provider,
        attempts: u32,
        last_error: String,
    },

    #[error("invalid {provider} base URL \"{base_url}\": {reason}")]
    InvalidBaseUrl {
        provider: Provider,
        base_url: String,
        reason: String,
    },
}

impl ProviderError {
    /// Failures the worker treats as "try again later": the cursor stays put
    /// and the provider's consecutive-failure count goes up.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable { .. } | ProviderError::RateLimited { .. }
        )
    }

    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProviderError::Malformed { .. })
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sale sink rejected {count} records for {job_id}: {reason}")]
    Rejected {
        job_id: String,
        count: usize,
        reason: String,
    },

    #[error("sale sink unavailable: {0}")]
    Unavailable(String),
}
