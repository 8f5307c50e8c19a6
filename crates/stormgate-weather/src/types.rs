use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stormgate_core::ProviderId;

/// Geographic coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Canonical weather reading produced by provider adapters.
///
/// Units are imperial: °F, inHg station pressure (not sea-level adjusted),
/// mph wind, degrees true for direction, feet altitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedWeather {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_gust: Option<f64>,
    pub altitude: f64,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observation_time: DateTime<Utc>,
    pub provider: ProviderId,
    #[serde(default)]
    pub is_manual_override: bool,
}

impl NormalizedWeather {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Staleness tier of a cached reading, ordered freshest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFreshness {
    Fresh,
    Stale,
    Emergency,
    Expired,
}

impl CacheFreshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Emergency => "emergency",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CacheFreshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading as persisted by the tiered cache.
///
/// `freshness` is whatever was true when the value was produced; the cache
/// recomputes it from `cached_at` on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedWeather {
    #[serde(flatten)]
    pub weather: NormalizedWeather,
    pub cached_at: DateTime<Utc>,
    pub freshness: CacheFreshness,
}

#[cfg(test)]
pub(crate) fn sample_weather(provider: &str, latitude: f64, longitude: f64) -> NormalizedWeather {
    NormalizedWeather {
        temperature: 72.5,
        humidity: 48.0,
        pressure: 29.42,
        wind_speed: 8.0,
        wind_direction: 225.0,
        wind_gust: Some(14.0),
        altitude: 489.0,
        location_name: "Austin, TX".to_string(),
        latitude,
        longitude,
        observation_time: Utc::now(),
        provider: ProviderId::from(provider),
        is_manual_override: false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_freshness_ordering() {
        assert!(CacheFreshness::Fresh < CacheFreshness::Stale);
        assert!(CacheFreshness::Stale < CacheFreshness::Emergency);
        assert!(CacheFreshness::Emergency < CacheFreshness::Expired);
    }

    #[test]
    fn test_freshness_serializes_snake_case() {
        let json = serde_json::to_string(&CacheFreshness::Emergency).unwrap();
        assert_eq!(json, "\"emergency\"");
    }

    #[test]
    fn test_cached_weather_flattens_reading() {
        let cached = CachedWeather {
            weather: sample_weather("primary", 30.2672, -97.7431),
            cached_at: Utc::now(),
            freshness: CacheFreshness::Fresh,
        };
        let value = serde_json::to_value(&cached).unwrap();
        assert_eq!(value["provider"], "primary");
        assert_eq!(value["freshness"], "fresh");
        assert!(value.get("weather").is_none());
    }

    #[test]
    fn test_manual_override_defaults_false() {
        let mut value = serde_json::to_value(sample_weather("primary", 0.0, 0.0)).unwrap();
        value.as_object_mut().unwrap().remove("is_manual_override");
        let reading: NormalizedWeather = serde_json::from_value(value).unwrap();
        assert!(!reading.is_manual_override);
    }
}
