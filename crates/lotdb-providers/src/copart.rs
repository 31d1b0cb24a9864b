use async_trait::async_trait;
use lotdb_core::Provider;

use crate::client::{ProviderClientConfig, ProviderHttp};
use crate::error::ProviderError;
use crate::normalize::normalize_copart_lot;
use crate::source::SaleSource;
use crate::types::{CopartSearchResponse, SalePage, SaleQuery};

/// Client for the Copart-like lot search API.
///
/// `GET {base}/lots/search?make=&model=&year_from=&year_to=&page=&size=`
#[derive(Debug)]
pub struct CopartClient {
    http: ProviderHttp,
    page_size: u32,
}

impl CopartClient {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] for an unusable base URL, or
    /// [`ProviderError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(config: &ProviderClientConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new(Provider::Copart, config)?,
            page_size: config.page_size.max(1),
        })
    }
}

#[async_trait]
impl SaleSource for CopartClient {
    fn provider(&self) -> Provider {
        Provider::Copart
    }

    async fn fetch_page(&self, query: &SaleQuery, page: u32) -> Result<SalePage, ProviderError> {
        let mut params = vec![("make", query.make.clone())];
        if let Some(model) = &query.model {
            params.push(("model", model.clone()));
        }
        params.extend([
            ("year_from", query.year_from.to_string()),
            ("year_to", query.year_to.to_string()),
            ("page", page.to_string()),
            ("size", self.page_size.to_string()),
        ]);

        let context = format!("{} page {page}", query.make);
        let response: CopartSearchResponse =
            self.http.get_json("lots/search", &params, &context).await?;
        let results = response.data.results;

        // An empty page ends the walk even if `last` was never set.
        let has_more = !results.last && !results.content.is_empty();
        let records = results
            .content
            .into_iter()
            .map(|lot| normalize_copart_lot(lot, query))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            provider = %Provider::Copart,
            make = %query.make,
            page,
            records = records.len(),
            total = ?results.total_elements,
            has_more,
            "copart page fetched"
        );

        Ok(SalePage {
            records,
            has_more,
            next_page: page + 1,
        })
    }
}
