//! HTTP plumbing shared by the provider clients: base URL handling,
//! request spacing, retry, status mapping, and body decoding.

use std::time::Duration;

use lotdb_core::{AppConfig, Provider};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use crate::error::ProviderError;
use crate::rate_limit::RequestSpacer;
use crate::retry::{retry_with_backoff, RetryPolicy};

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Settings for one provider client.
#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Minimum spacing between consecutive requests to this provider.
    pub min_interval: Duration,
    pub page_size: u32,
    pub retry: RetryPolicy,
}

impl ProviderClientConfig {
    #[must_use]
    pub fn from_app_config(provider: Provider, config: &AppConfig) -> Self {
        let base_url = match provider {
            Provider::Copart => config.copart_base_url.clone(),
            Provider::Iaai => config.iaai_base_url.clone(),
        };
        Self {
            base_url,
            timeout_secs: config.provider_request_timeout_secs,
            user_agent: config.provider_user_agent.clone(),
            min_interval: Duration::from_millis(config.provider_min_interval_ms),
            page_size: config.provider_page_size,
            retry: RetryPolicy {
                max_retries: config.provider_max_retries,
                backoff_base_ms: config.provider_backoff_base_ms,
                rate_limited_backoff_ms: config.provider_rate_limited_backoff_ms,
            },
        }
    }

    /// Settings for tests against a local mock server: no spacing, no
    /// retries, short timeout.
    #[must_use]
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            timeout_secs: 5,
            user_agent: "lotdb-test/0.1".to_owned(),
            min_interval: Duration::ZERO,
            page_size: 50,
            retry: RetryPolicy::none(),
        }
    }
}

/// One provider's HTTP endpoint with its own spacer and retry policy.
#[derive(Debug)]
pub(crate) struct ProviderHttp {
    provider: Provider,
    client: Client,
    base_url: Url,
    spacer: RequestSpacer,
    retry: RetryPolicy,
}

impl ProviderHttp {
    pub(crate) fn new(provider: Provider, config: &ProviderClientConfig) -> Result<Self, ProviderError> {
        let base_url = parse_base_url(provider, &config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            provider,
            client,
            base_url,
            spacer: RequestSpacer::new(config.min_interval),
            retry: config.retry,
        })
    }

    /// `GET {base}/{path}?{query}` decoded as `T`. Every attempt, retries
    /// included, waits on the spacer first.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> Result<T, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::InvalidBaseUrl {
                provider: self.provider,
                base_url: self.base_url.to_string(),
                reason: "cannot be a base".to_owned(),
            })?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

        let provider = self.provider;
        retry_with_backoff(provider, self.retry, || {
            let url = url.clone();
            async move {
                self.spacer.wait().await;
                tracing::debug!(%provider, url = %url, "provider request");
                let response = self.client.get(url.clone()).send().await?;
                let status = response.status();

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    let retry_after_secs = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    return Err(ProviderError::RateLimited {
                        provider,
                        retry_after_secs,
                    });
                }

                if !status.is_success() {
                    return Err(ProviderError::UnexpectedStatus {
                        provider,
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }

                let body = response.text().await?;
                serde_json::from_str::<T>(&body).map_err(|e| ProviderError::Malformed {
                    provider,
                    context: context.to_owned(),
                    reason: e.to_string(),
                })
            }
        })
        .await
    }
}

fn parse_base_url(provider: Provider, raw: &str) -> Result<Url, ProviderError> {
    let invalid = |reason: String| ProviderError::InvalidBaseUrl {
        provider,
        base_url: raw.to_owned(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("cannot be a base".to_owned()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_must_be_http() {
        let err = parse_base_url(Provider::Copart, "ftp://copart.test").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidBaseUrl { .. }));
        assert!(parse_base_url(Provider::Copart, "not a url").is_err());
        assert!(parse_base_url(Provider::Iaai, "https://iaai.test/api/").is_ok());
    }

    #[tokio::test]
    async fn new_rejects_bad_base_url() {
        let config = ProviderClientConfig::for_tests("mailto:ops@example.com");
        assert!(ProviderHttp::new(Provider::Iaai, &config).is_err());
    }
}
