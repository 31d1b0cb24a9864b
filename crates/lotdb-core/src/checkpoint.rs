//! Durable per-scope resume state for the two auction providers.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External auction data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Copart,
    Iaai,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Copart, Provider::Iaai];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Copart => "copart",
            Provider::Iaai => "iaai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("{provider} page out of order: expected page {expected}, got {got}")]
    OutOfOrderPage {
        provider: Provider,
        expected: u32,
        got: u32,
    },

    #[error("{provider} is already completed for this scope")]
    ProviderAlreadyCompleted { provider: Provider },
}

/// Resume state for one scope key.
///
/// Page cursors hold the last page fully collected (pages are 1-based, so
/// `0` means nothing collected yet). They only ever move forward; the only
/// way back is the audited reset in the checkpoint store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub copart_last_page: u32,
    pub iaai_last_page: u32,
    pub copart_completed: bool,
    pub iaai_completed: bool,
    pub total_records_collected: u64,
    pub last_collected_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    #[must_use]
    pub fn last_page(&self, provider: Provider) -> u32 {
        match provider {
            Provider::Copart => self.copart_last_page,
            Provider::Iaai => self.iaai_last_page,
        }
    }

    /// The page to request next from `provider`.
    #[must_use]
    pub fn next_page(&self, provider: Provider) -> u32 {
        self.last_page(provider).saturating_add(1)
    }

    #[must_use]
    pub fn is_provider_completed(&self, provider: Provider) -> bool {
        match provider {
            Provider::Copart => self.copart_completed,
            Provider::Iaai => self.iaai_completed,
        }
    }

    /// Both providers exhausted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.copart_completed && self.iaai_completed
    }

    /// Providers that still have pages to collect.
    #[must_use]
    pub fn pending_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| !self.is_provider_completed(*p))
            .collect()
    }

    /// Applies one successfully fetched page.
    ///
    /// `next_page` is the cursor reported by the provider client (the page
    /// after the one just fetched). It must be exactly one past the stored
    /// cursor so pages are neither re-counted nor skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ProviderAlreadyCompleted`] if the provider
    /// was already exhausted, or [`CheckpointError::OutOfOrderPage`] if the
    /// page does not directly follow the stored cursor. The checkpoint is
    /// left untouched on error.
    pub fn record_page(
        &mut self,
        provider: Provider,
        next_page: u32,
        records: u64,
        has_more: bool,
        at: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        if self.is_provider_completed(provider) {
            return Err(CheckpointError::ProviderAlreadyCompleted { provider });
        }

        let expected = self.next_page(provider);
        let fetched = next_page.saturating_sub(1);
        if fetched != expected {
            return Err(CheckpointError::OutOfOrderPage {
                provider,
                expected,
                got: fetched,
            });
        }

        match provider {
            Provider::Copart => {
                self.copart_last_page = fetched;
                self.copart_completed = !has_more;
            }
            Provider::Iaai => {
                self.iaai_last_page = fetched;
                self.iaai_completed = !has_more;
            }
        }
        self.total_records_collected = self.total_records_collected.saturating_add(records);
        self.last_collected_at = Some(at);
        Ok(())
    }

    /// True when work remains and nothing has been collected within
    /// `threshold` of `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.is_complete() {
            return false;
        }
        self.last_collected_at
            .is_some_and(|at| now.signed_duration_since(at) > threshold)
    }

    /// No page has been recorded for either provider, as after a reset.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.copart_last_page == 0
            && self.iaai_last_page == 0
            && !self.copart_completed
            && !self.iaai_completed
    }

    /// True if `self` could legally follow `previous` without a reset:
    /// no cursor moved back, no completion flag was cleared, and the record
    /// total did not shrink.
    #[must_use]
    pub fn is_forward_of(&self, previous: &Checkpoint) -> bool {
        self.copart_last_page >= previous.copart_last_page
            && self.iaai_last_page >= previous.iaai_last_page
            && (self.copart_completed || !previous.copart_completed)
            && (self.iaai_completed || !previous.iaai_completed)
            && self.total_records_collected >= previous.total_records_collected
    }
}
