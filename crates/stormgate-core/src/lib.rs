pub mod clock;
pub mod config;
pub mod error;
pub mod provider;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    CacheConfig, CircuitBreakerConfig, Config, ProviderEndpoint, RetryConfig, ValidationResult,
    WeatherConfig,
};
pub use error::{
    ConfigError, FailureKind, ProviderError, ReqwestErrorExt, RusqliteErrorExt, StorageError,
    WeatherError,
};
pub use provider::ProviderId;

use anyhow::Result;

/// Initialize logging for the stormgate binary and tools.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!("Stormgate core initialized");
    Ok(())
}
