//! Fallback orchestrator: the composition root of the resilience layer.
//!
//! # Data Flow
//! ```text
//! get_weather(coords, providers):
//!     for provider in caller order:
//!         circuit.can_request?  no  → skip (no retry budget spent)
//!         with_retry(provider.fetch)
//!             ok  → record_success, cache write-through, return Live
//!             err → record_failure, next provider
//!     cache.get_cached_weather(coords) usable? → return Cached
//!     otherwise → WeatherError::AllProvidersExhausted
//! ```
//!
//! Individual provider failures never reach the caller. The orchestrator
//! never fabricates a reading; substituting manual conditions is the
//! caller's job.

use std::sync::Arc;
use std::time::Duration;
use stormgate_core::{CircuitBreakerConfig, FailureKind, ProviderId, RetryConfig, WeatherError};
use tokio::task::JoinHandle;

use crate::cache::{
    get_freshness_message, should_refresh_in_background, should_use_cache, TieredCache,
};
use crate::circuit::{CircuitBreakerRegistry, CircuitState};
use crate::provider::WeatherProvider;
use crate::retry::with_retry;
use crate::types::{CacheFreshness, CachedWeather, Coordinates, NormalizedWeather};

/// Result of a weather lookup
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fetched from a provider during this call
    Live(NormalizedWeather),
    /// Served from the cache after every provider was skipped or failed
    Cached(CachedWeather),
}

impl FetchOutcome {
    pub fn weather(&self) -> &NormalizedWeather {
        match self {
            FetchOutcome::Live(weather) => weather,
            FetchOutcome::Cached(cached) => &cached.weather,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FetchOutcome::Live(_))
    }

    pub fn freshness(&self) -> CacheFreshness {
        match self {
            FetchOutcome::Live(_) => CacheFreshness::Fresh,
            FetchOutcome::Cached(cached) => cached.freshness,
        }
    }

    /// Advisory to show with the reading, if it is not live-fresh
    pub fn freshness_message(&self) -> Option<&'static str> {
        get_freshness_message(self.freshness())
    }

    pub fn should_refresh_in_background(&self) -> bool {
        should_refresh_in_background(self.freshness())
    }
}

/// Walks the caller's provider order behind circuits and retries, falling
/// back to the tiered cache.
#[derive(Debug, Clone)]
pub struct FallbackOrchestrator {
    registry: Arc<CircuitBreakerRegistry>,
    cache: Arc<TieredCache>,
}

impl FallbackOrchestrator {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, cache: Arc<TieredCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Fetch a usable reading for `coords`.
    ///
    /// Providers are tried strictly in slice order; each one's retries are
    /// exhausted before moving on.
    ///
    /// # Errors
    /// [`WeatherError::AllProvidersExhausted`] when no provider succeeded and
    /// the cache holds nothing usable near `coords`, or
    /// [`WeatherError::NoProviders`] when `providers` is empty and the cache
    /// is also empty.
    pub async fn get_weather(
        &self,
        coords: Coordinates,
        providers: &[Arc<dyn WeatherProvider>],
        circuit_config: &CircuitBreakerConfig,
        retry_config: &RetryConfig,
    ) -> Result<FetchOutcome, WeatherError> {
        let mut attempted: Vec<(ProviderId, Option<FailureKind>)> = Vec::new();

        for provider in providers {
            let id = provider.id();

            if !self.registry.can_request(id, circuit_config) {
                let retry_in = self.registry.get_time_until_retry(id, circuit_config);
                tracing::info!(
                    provider = %id,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Circuit open, skipping provider"
                );
                attempted.push((id.clone(), None));
                continue;
            }

            let adapter: &dyn WeatherProvider = provider.as_ref();
            match with_retry(retry_config, move || adapter.fetch(coords)).await {
                Ok(reading) => {
                    self.registry.record_success(id, circuit_config);
                    self.cache.cache_weather(&reading);
                    tracing::info!(provider = %id, "Live weather fetched");
                    return Ok(FetchOutcome::Live(reading));
                }
                Err(e) => {
                    self.registry.record_failure(id, circuit_config);
                    tracing::warn!(provider = %id, kind = %e.kind(), "Provider failed: {}", e);
                    attempted.push((id.clone(), Some(e.kind())));
                }
            }
        }

        match self.cache.get_cached_weather(Some(coords)) {
            Some(cached) if should_use_cache(cached.freshness) => {
                tracing::info!(
                    freshness = %cached.freshness,
                    provider = %cached.weather.provider,
                    "Serving cached weather"
                );
                Ok(FetchOutcome::Cached(cached))
            }
            Some(cached) => {
                tracing::error!(
                    age_minutes = self.cache.get_cache_age_minutes(cached.cached_at),
                    "Cached weather expired and all providers failed"
                );
                Err(self.exhausted(attempted))
            }
            None => {
                tracing::error!("No live or cached weather available");
                Err(self.exhausted(attempted))
            }
        }
    }

    /// Run [`get_weather`](Self::get_weather) on a background task.
    ///
    /// Used after serving a stale or emergency cached reading so the next
    /// read is fresh.
    pub fn spawn_refresh(
        &self,
        coords: Coordinates,
        providers: Vec<Arc<dyn WeatherProvider>>,
        circuit_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> JoinHandle<Result<FetchOutcome, WeatherError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .get_weather(coords, &providers, &circuit_config, &retry_config)
                .await
        })
    }

    pub fn get_circuit_state(&self, provider: &ProviderId) -> CircuitState {
        self.registry.get_circuit_state(provider)
    }

    pub fn get_time_until_retry(
        &self,
        provider: &ProviderId,
        config: &CircuitBreakerConfig,
    ) -> Duration {
        self.registry.get_time_until_retry(provider, config)
    }

    pub fn reset_circuit(&self, provider: &ProviderId) {
        self.registry.reset_circuit(provider);
    }

    pub fn reset_all_circuits(&self) {
        self.registry.reset_all_circuits();
    }

    fn exhausted(&self, attempted: Vec<(ProviderId, Option<FailureKind>)>) -> WeatherError {
        if attempted.is_empty() {
            WeatherError::NoProviders
        } else {
            WeatherError::AllProvidersExhausted { attempted }
        }
    }
}
