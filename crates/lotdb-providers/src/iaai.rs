use async_trait::async_trait;
use lotdb_core::Provider;

use crate::client::{ProviderClientConfig, ProviderHttp};
use crate::error::ProviderError;
use crate::normalize::normalize_iaai_vehicle;
use crate::source::SaleSource;
use crate::types::{IaaiSoldResponse, SalePage, SaleQuery};

/// Client for the IAAI-like sold-vehicles API.
///
/// `GET {base}/vehicles/sold?make=&model=&yearFrom=&yearTo=&pageNumber=&pageSize=`
#[derive(Debug)]
pub struct IaaiClient {
    http: ProviderHttp,
    page_size: u32,
}

impl IaaiClient {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] for an unusable base URL, or
    /// [`ProviderError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(config: &ProviderClientConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new(Provider::Iaai, config)?,
            page_size: config.page_size.max(1),
        })
    }
}

#[async_trait]
impl SaleSource for IaaiClient {
    fn provider(&self) -> Provider {
        Provider::Iaai
    }

    async fn fetch_page(&self, query: &SaleQuery, page: u32) -> Result<SalePage, ProviderError> {
        let mut params = vec![("make", query.make.clone())];
        if let Some(model) = &query.model {
            params.push(("model", model.clone()));
        }
        params.extend([
            ("yearFrom", query.year_from.to_string()),
            ("yearTo", query.year_to.to_string()),
            ("pageNumber", page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ]);

        let context = format!("{} page {page}", query.make);
        let response: IaaiSoldResponse =
            self.http.get_json("vehicles/sold", &params, &context).await?;

        if let Some(echoed) = response.page_number {
            if echoed != page {
                return Err(ProviderError::Malformed {
                    provider: Provider::Iaai,
                    context,
                    reason: format!("asked for page {page}, got page {echoed}"),
                });
            }
        }

        let has_more = response.has_next_page && !response.items.is_empty();
        let records = response
            .items
            .into_iter()
            .map(|vehicle| normalize_iaai_vehicle(vehicle, query))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            provider = %Provider::Iaai,
            make = %query.make,
            page,
            records = records.len(),
            has_more,
            "iaai page fetched"
        );

        Ok(SalePage {
            records,
            has_more,
            next_page: page + 1,
        })
    }
}
