use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;
use crate::provider::ProviderId;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Circuit breaker policy.
///
/// Passed on every registry call rather than stored on the circuit, so the
/// same circuit state can be evaluated under different policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit
    pub failure_threshold: u32,
    /// Sliding window for counting failures
    pub failure_window_ms: u64,
    /// Time an open circuit blocks requests before allowing a probe
    pub recovery_time_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            recovery_time_ms: 30_000,
        }
    }
}

/// Retry policy for a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first try
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub base_delay_ms: u64,
    /// Cap on the exponential part of the delay
    pub max_delay_ms: u64,
    /// Upper bound of the additive random jitter
    pub jitter_ms: u64,
    /// Hard timeout for each attempt
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter_ms: 250,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum distance between the caller and a cached reading
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,

    /// Provider credited for readings migrated from the legacy cache record
    #[serde(default = "default_legacy_provider")]
    pub legacy_provider: ProviderId,
}

fn default_max_distance_km() -> f64 {
    5.0
}

fn default_legacy_provider() -> ProviderId {
    ProviderId::from("openweathermap")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_distance_km: default_max_distance_km(),
            legacy_provider: default_legacy_provider(),
        }
    }
}

/// Endpoint for the reference JSON adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Providers in the order they are tried
    #[serde(default)]
    pub provider_order: Vec<ProviderId>,

    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderEndpoint>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            provider_order: Vec::new(),
            providers: BTreeMap::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the persisted weather cache
    pub data_dir: PathBuf,

    #[serde(default)]
    pub weather: WeatherConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stormgate");

        Self {
            data_dir,
            weather: WeatherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {}", config_path.display(), e)))?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let weather = &self.weather;

        if weather.provider_order.is_empty() {
            result.add_warning(
                "weather.provider_order",
                "No providers configured - only cached readings will be served",
            );
        }

        for provider in &weather.provider_order {
            if !weather.providers.contains_key(provider) {
                result.add_warning(
                    format!("weather.providers.{}", provider),
                    "Provider is listed in provider_order but has no endpoint",
                );
            }
        }

        for (provider, endpoint) in &weather.providers {
            self.validate_url(
                &endpoint.base_url,
                &format!("weather.providers.{}.base_url", provider),
                &mut result,
            );
        }

        let circuit = &weather.circuit_breaker;
        if circuit.failure_threshold == 0 {
            result.add_error(
                "weather.circuit_breaker.failure_threshold",
                "Failure threshold must be greater than 0",
            );
        }
        if circuit.failure_window_ms == 0 {
            result.add_error(
                "weather.circuit_breaker.failure_window_ms",
                "Failure window must be greater than 0",
            );
        }
        if circuit.recovery_time_ms == 0 {
            result.add_error(
                "weather.circuit_breaker.recovery_time_ms",
                "Recovery time must be greater than 0",
            );
        }

        let retry = &weather.retry;
        if retry.base_delay_ms > retry.max_delay_ms {
            result.add_warning(
                "weather.retry.base_delay_ms",
                "Base delay exceeds max delay; every retry will wait max_delay_ms",
            );
        }
        if retry.request_timeout_ms == 0 {
            result.add_error(
                "weather.retry.request_timeout_ms",
                "Request timeout must be greater than 0",
            );
        }
        if retry.max_retries > 10 {
            result.add_warning(
                "weather.retry.max_retries",
                "More than 10 retries per provider delays fallback considerably",
            );
        }

        let cache = &weather.cache;
        if !cache.max_distance_km.is_finite() || cache.max_distance_km < 0.0 {
            result.add_error(
                "weather.cache.max_distance_km",
                "Max distance must be a non-negative number",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("stormgate");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.weather.provider_order = vec![ProviderId::from("primary")];
        config.weather.providers.insert(
            ProviderId::from("primary"),
            ProviderEndpoint {
                base_url: "https://weather.example.com/v1/current".to_string(),
            },
        );
        config
    }

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.field == "weather.provider_order"));
    }

    #[test]
    fn test_configured_provider_has_no_warnings() {
        let result = configured().validate();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = configured();
        config.weather.providers.insert(
            ProviderId::from("primary"),
            ProviderEndpoint {
                base_url: "ftp://weather.example.com".to_string(),
            },
        );
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_provider_without_endpoint_is_warning() {
        let mut config = configured();
        config.weather.provider_order.push(ProviderId::from("backup"));
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.field == "weather.providers.backup"));
    }

    #[test]
    fn test_zero_threshold_is_error() {
        let mut config = configured();
        config.weather.circuit_breaker.failure_threshold = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "weather.circuit_breaker.failure_threshold"));
    }

    #[test]
    fn test_negative_distance_is_error() {
        let mut config = configured();
        config.weather.cache.max_distance_km = -1.0;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_toml_round_trip_with_partial_sections() {
        let toml_src = r#"
            data_dir = "/tmp/stormgate"

            [weather]
            provider_order = ["tomorrow_io", "openweathermap"]

            [weather.circuit_breaker]
            failure_threshold = 5
            failure_window_ms = 120000
            recovery_time_ms = 45000

            [weather.retry]
            max_retries = 1
            base_delay_ms = 200
            max_delay_ms = 1000
            jitter_ms = 0
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.weather.provider_order.len(), 2);
        assert_eq!(config.weather.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.weather.retry.request_timeout_ms, 10_000);
        assert_eq!(config.weather.cache.max_distance_km, 5.0);
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.weather.circuit_breaker, CircuitBreakerConfig::default());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.data_dir, config.data_dir);
    }

    #[test]
    fn test_load_from_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[weather\nprovider_order = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_unreadable_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();

        // A directory exists at the path but cannot be read as a file
        let err = Config::load_from(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
