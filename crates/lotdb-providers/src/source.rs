use async_trait::async_trait;
use lotdb_core::Provider;

use crate::error::ProviderError;
use crate::types::{SalePage, SaleQuery};

/// A paginated source of auction sale records.
///
/// Pages are 1-based. A successful fetch of page `n` returns
/// `next_page == n + 1`; callers advance their cursor only on `Ok`.
#[async_trait]
pub trait SaleSource: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetches one page, retrying transient failures internally.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Unavailable`] after retries on transport or 5xx failures.
    /// - [`ProviderError::RateLimited`] after retries on HTTP 429.
    /// - [`ProviderError::Malformed`] when the body cannot be decoded (not retried).
    async fn fetch_page(&self, query: &SaleQuery, page: u32) -> Result<SalePage, ProviderError>;
}
