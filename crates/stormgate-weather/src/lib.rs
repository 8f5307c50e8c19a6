//! Weather resilience layer for stormgate
//!
//! Guarantees callers a usable weather reading: providers are tried in the
//! caller's order behind per-provider circuit breakers and bounded retries,
//! with a freshness-tiered, location-checked cache as the last resort.

pub mod cache;
pub mod circuit;
pub mod fallback;
pub mod geo;
pub mod provider;
pub mod retry;
pub mod storage;
pub mod types;

pub use cache::{
    calculate_freshness, get_cache_age_minutes, get_freshness_message, should_refresh_in_background,
    should_use_cache, TieredCache,
};
pub use circuit::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
pub use fallback::{FallbackOrchestrator, FetchOutcome};
pub use geo::get_distance_km;
pub use provider::{JsonHttpProvider, WeatherProvider};
pub use retry::{calculate_backoff_delay, with_retry};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use types::*;

pub use stormgate_core::{CircuitBreakerConfig, FailureKind, ProviderError, ProviderId, RetryConfig};
