//! A [`SaleSource`] that replays a fixed script instead of calling an API.
//! The collector tests drive the worker and scheduler through it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lotdb_core::{slugify, Provider};

use crate::error::ProviderError;
use crate::source::SaleSource;
use crate::types::{SalePage, SaleQuery, SaleRecord};

/// Failure to inject in place of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Unavailable,
    RateLimited,
    Malformed,
}

#[derive(Debug, Default, Clone)]
struct Script {
    /// Record count per page, page 1 first.
    pages: Vec<usize>,
    /// Page number to (failure, remaining occurrences).
    failures: HashMap<u32, (ScriptedFailure, u32)>,
    always: Option<ScriptedFailure>,
}

#[derive(Debug)]
pub struct ScriptedSource {
    provider: Provider,
    scripts: Mutex<HashMap<String, Script>>,
    fetches: Mutex<Vec<(String, u32)>>,
    delay: Duration,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            scripts: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Pages for `make`, as record counts. The last page reports no more.
    #[must_use]
    pub fn with_pages(self, make: &str, pages: &[usize]) -> Self {
        self.script_mut(make, |s| s.pages = pages.to_vec());
        self
    }

    /// Fails `page` of `make` the next `times` it is requested.
    #[must_use]
    pub fn with_failure(self, make: &str, page: u32, failure: ScriptedFailure, times: u32) -> Self {
        self.script_mut(make, |s| {
            s.failures.insert(page, (failure, times));
        });
        self
    }

    /// Fails every request for `make`.
    #[must_use]
    pub fn always_failing(self, make: &str, failure: ScriptedFailure) -> Self {
        self.script_mut(make, |s| s.always = Some(failure));
        self
    }

    /// Sleeps this long inside every fetch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every `(make slug, page)` requested so far, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<(String, u32)> {
        self.fetches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Pages requested for `make`, in order.
    #[must_use]
    pub fn pages_fetched(&self, make: &str) -> Vec<u32> {
        let key = slugify(make);
        self.fetches()
            .into_iter()
            .filter(|(m, _)| *m == key)
            .map(|(_, p)| p)
            .collect()
    }

    fn script_mut(&self, make: &str, edit: impl FnOnce(&mut Script)) {
        let mut scripts = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        edit(scripts.entry(slugify(make)).or_default());
    }

    fn failure_for(&self, key: &str, page: u32) -> Option<ScriptedFailure> {
        let mut scripts = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let script = scripts.get_mut(key)?;
        if let Some(always) = script.always {
            return Some(always);
        }
        match script.failures.get_mut(&page) {
            Some((failure, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*failure)
            }
            _ => None,
        }
    }

    fn error(&self, failure: ScriptedFailure, page: u32) -> ProviderError {
        match failure {
            ScriptedFailure::Unavailable => ProviderError::Unavailable {
                provider: self.provider,
                attempts: 1,
                last_error: format!("scripted outage on page {page}"),
            },
            ScriptedFailure::RateLimited => ProviderError::RateLimited {
                provider: self.provider,
                retry_after_secs: 0,
            },
            ScriptedFailure::Malformed => ProviderError::Malformed {
                provider: self.provider,
                context: format!("page {page}"),
                reason: "scripted malformed body".to_owned(),
            },
        }
    }
}

#[async_trait]
impl SaleSource for ScriptedSource {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_page(&self, query: &SaleQuery, page: u32) -> Result<SalePage, ProviderError> {
        let key = slugify(&query.make);
        self.fetches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((key.clone(), page));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(failure) = self.failure_for(&key, page) {
            return Err(self.error(failure, page));
        }

        let pages = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .map(|s| s.pages.clone())
            .unwrap_or_default();

        let index = usize::try_from(page.saturating_sub(1)).unwrap_or(usize::MAX);
        let count = pages.get(index).copied().unwrap_or(0);
        let has_more = page > 0 && index + 1 < pages.len();

        let records = (0..count)
            .map(|i| SaleRecord {
                provider: self.provider,
                lot_id: format!("{}-{key}-{page}-{i}", self.provider),
                vin: None,
                make: query.make.clone(),
                model: query.model.clone(),
                year: Some(query.year_to),
                sale_date: None,
                damage: None,
                odometer: None,
                location: None,
                sale_price: None,
                currency: "USD".to_owned(),
            })
            .collect();

        Ok(SalePage {
            records,
            has_more,
            next_page: page + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(make: &str) -> SaleQuery {
        SaleQuery {
            make: make.to_owned(),
            model: None,
            year_from: 2000,
            year_to: 2020,
        }
    }

    #[tokio::test]
    async fn replays_pages_then_reports_end() {
        let source = ScriptedSource::new(Provider::Copart).with_pages("Toyota", &[50, 50, 10]);

        let first = source.fetch_page(&query("Toyota"), 1).await.unwrap();
        assert_eq!(first.records.len(), 50);
        assert!(first.has_more);
        assert_eq!(first.next_page, 2);

        let last = source.fetch_page(&query("Toyota"), 3).await.unwrap();
        assert_eq!(last.records.len(), 10);
        assert!(!last.has_more);

        assert_eq!(source.pages_fetched("toyota"), vec![1, 3]);
    }

    #[tokio::test]
    async fn injected_failure_is_consumed() {
        let source = ScriptedSource::new(Provider::Iaai)
            .with_pages("Honda", &[5])
            .with_failure("Honda", 1, ScriptedFailure::Unavailable, 1);

        let err = source.fetch_page(&query("Honda"), 1).await.unwrap_err();
        assert!(err.is_transient());
        let page = source.fetch_page(&query("Honda"), 1).await.unwrap();
        assert_eq!(page.records.len(), 5);
    }

    #[tokio::test]
    async fn unknown_make_is_an_empty_final_page() {
        let source = ScriptedSource::new(Provider::Iaai);
        let page = source.fetch_page(&query("Saab"), 1).await.unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
    }
}
