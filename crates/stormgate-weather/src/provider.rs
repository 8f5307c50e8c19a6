//! Provider adapter contract and a reference JSON-over-HTTP adapter.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use stormgate_core::{ProviderError, ProviderId, ReqwestErrorExt, WeatherConfig};
use url::Url;

use crate::types::{Coordinates, NormalizedWeather};

const USER_AGENT: &str = "Stormgate/0.1.0";

/// An upstream weather source.
///
/// Implementations do their own parsing and unit conversion, and must
/// report every failure as a [`ProviderError`] so retry and circuit logic
/// can classify it.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    async fn fetch(&self, coords: Coordinates) -> Result<NormalizedWeather, ProviderError>;
}

/// Errors building an adapter from configuration
#[derive(Debug, thiserror::Error)]
pub enum ProviderSetupError {
    #[error("Invalid endpoint URL for {provider}: {source}")]
    InvalidUrl {
        provider: ProviderId,
        source: url::ParseError,
    },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Adapter for endpoints that already serve [`NormalizedWeather`] JSON,
/// such as an in-house aggregation proxy.
///
/// Requests `GET <base_url>?lat=<lat>&lon=<lon>`.
#[derive(Debug, Clone)]
pub struct JsonHttpProvider {
    id: ProviderId,
    client: Arc<Client>,
    endpoint: Url,
}

impl JsonHttpProvider {
    pub fn new(
        id: ProviderId,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderSetupError> {
        let endpoint = Url::parse(base_url).map_err(|source| ProviderSetupError::InvalidUrl {
            provider: id.clone(),
            source,
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            id,
            client: Arc::new(client),
            endpoint,
        })
    }

    fn request_url(&self, coords: Coordinates) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lat", &coords.latitude.to_string())
            .append_pair("lon", &coords.longitude.to_string());
        url
    }
}

#[async_trait]
impl WeatherProvider for JsonHttpProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn fetch(&self, coords: Coordinates) -> Result<NormalizedWeather, ProviderError> {
        let url = self.request_url(coords);
        tracing::debug!(provider = %self.id, "Fetching weather from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_provider_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status.as_u16(), body.trim().to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(ReqwestErrorExt::into_transport_error)?;

        let mut reading: NormalizedWeather = serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        reading.provider = self.id.clone();
        Ok(reading)
    }
}

/// Build adapters for `provider_order`, skipping providers without an endpoint.
pub fn providers_from_config(
    config: &WeatherConfig,
) -> Result<Vec<Arc<dyn WeatherProvider>>, ProviderSetupError> {
    let timeout = Duration::from_millis(config.retry.request_timeout_ms);
    let mut providers: Vec<Arc<dyn WeatherProvider>> = Vec::new();

    for id in &config.provider_order {
        match config.providers.get(id) {
            Some(endpoint) => {
                let provider = JsonHttpProvider::new(id.clone(), &endpoint.base_url, timeout)?;
                providers.push(Arc::new(provider));
            }
            None => tracing::warn!(provider = %id, "No endpoint configured, skipping provider"),
        }
    }

    Ok(providers)
}
