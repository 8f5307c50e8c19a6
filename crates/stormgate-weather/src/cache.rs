//! Tiered weather cache.
//!
//! Remembers the last good reading in a primary slot and one snapshot per
//! provider. Freshness is never trusted from storage: it is recomputed from
//! `cached_at` on every read, and a reading taken too far from the caller is
//! treated as a miss.
//!
//! Storage failures never escape this module. They are logged and reported
//! as a cache miss.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use stormgate_core::{CacheConfig, Clock, ProviderId, SystemClock};

use crate::geo::get_distance_km;
use crate::storage::KeyValueStore;
use crate::types::{CacheFreshness, CachedWeather, Coordinates, NormalizedWeather};

/// Primary slot holding the most recent reading
pub const PRIMARY_KEY: &str = "weather_cache_v2";
/// Single-record format written by earlier releases
pub const LEGACY_KEY: &str = "weather_cache";
/// Prefix of the per-provider diagnostic slots
pub const PROVIDER_KEY_PREFIX: &str = "weather_cache_v2_provider_";

const FRESH_MINUTES: i64 = 5;
const STALE_MINUTES: i64 = 30;
const EMERGENCY_MINUTES: i64 = 120;

/// Classify a reading by its age at `now`.
///
/// A `cached_at` in the future counts as age zero.
pub fn calculate_freshness(cached_at: DateTime<Utc>, now: DateTime<Utc>) -> CacheFreshness {
    let age = now - cached_at;
    if age < Duration::minutes(FRESH_MINUTES) {
        CacheFreshness::Fresh
    } else if age < Duration::minutes(STALE_MINUTES) {
        CacheFreshness::Stale
    } else if age < Duration::minutes(EMERGENCY_MINUTES) {
        CacheFreshness::Emergency
    } else {
        CacheFreshness::Expired
    }
}

/// Whether a reading of this tier may be served at all
pub fn should_use_cache(freshness: CacheFreshness) -> bool {
    freshness != CacheFreshness::Expired
}

/// Whether the caller should serve the reading and refresh behind it
pub fn should_refresh_in_background(freshness: CacheFreshness) -> bool {
    matches!(freshness, CacheFreshness::Stale | CacheFreshness::Emergency)
}

/// Advisory shown alongside cached data; `None` when the data is fresh
pub fn get_freshness_message(freshness: CacheFreshness) -> Option<&'static str> {
    match freshness {
        CacheFreshness::Fresh => None,
        CacheFreshness::Stale => Some("Weather data is a few minutes old."),
        CacheFreshness::Emergency => {
            Some("Live weather unavailable. Showing conditions from over 30 minutes ago.")
        }
        CacheFreshness::Expired => {
            Some("Weather data is more than 2 hours old. Enter conditions manually.")
        }
    }
}

/// Whole minutes elapsed since `cached_at`, never negative
pub fn get_cache_age_minutes(cached_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - cached_at).num_minutes().max(0)
}

/// Reading shape stored under [`LEGACY_KEY`]; it predates provider tagging.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    weather: LegacyReading,
    /// Milliseconds since the Unix epoch
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct LegacyReading {
    temperature: f64,
    humidity: f64,
    pressure: f64,
    wind_speed: f64,
    wind_direction: f64,
    #[serde(default)]
    wind_gust: Option<f64>,
    #[serde(default)]
    altitude: f64,
    #[serde(default)]
    location_name: String,
    latitude: f64,
    longitude: f64,
    observation_time: DateTime<Utc>,
    #[serde(default)]
    is_manual_override: bool,
}

impl LegacyRecord {
    fn into_cached(self, provider: ProviderId) -> Option<CachedWeather> {
        let cached_at = DateTime::from_timestamp_millis(self.timestamp)?;
        let w = self.weather;
        Some(CachedWeather {
            weather: NormalizedWeather {
                temperature: w.temperature,
                humidity: w.humidity,
                pressure: w.pressure,
                wind_speed: w.wind_speed,
                wind_direction: w.wind_direction,
                wind_gust: w.wind_gust,
                altitude: w.altitude,
                location_name: w.location_name,
                latitude: w.latitude,
                longitude: w.longitude,
                observation_time: w.observation_time,
                provider,
                is_manual_override: w.is_manual_override,
            },
            cached_at,
            freshness: CacheFreshness::Fresh,
        })
    }
}

fn provider_key(provider: &ProviderId) -> String {
    format!("{}{}", PROVIDER_KEY_PREFIX, provider)
}

/// Freshness-tiered, location-validated weather cache.
pub struct TieredCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    /// Serializes writes so migration never clobbers a concurrent write
    write_lock: Mutex<()>,
}

impl TieredCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn calculate_freshness(&self, cached_at: DateTime<Utc>) -> CacheFreshness {
        calculate_freshness(cached_at, self.clock.now())
    }

    pub fn get_cache_age_minutes(&self, cached_at: DateTime<Utc>) -> i64 {
        get_cache_age_minutes(cached_at, self.clock.now())
    }

    /// Store a fresh reading in the primary slot and its provider's slot.
    ///
    /// Write failures are logged; the returned value is what was (or would
    /// have been) stored.
    pub fn cache_weather(&self, reading: &NormalizedWeather) -> CachedWeather {
        let cached = CachedWeather {
            weather: reading.clone(),
            cached_at: self.clock.now(),
            freshness: CacheFreshness::Fresh,
        };

        let json = match serde_json::to_string(&cached) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize weather for cache: {}", e);
                return cached;
            }
        };

        let _guard = self.write_lock.lock();
        if let Err(e) = self.store.set(PRIMARY_KEY, &json) {
            tracing::warn!("Failed to write primary weather cache: {}", e);
        }
        if let Err(e) = self.store.set(&provider_key(&reading.provider), &json) {
            tracing::warn!(provider = %reading.provider, "Failed to write provider weather cache: {}", e);
        }
        tracing::info!(
            provider = %reading.provider,
            location = %reading.location_name,
            "Cached weather reading"
        );

        cached
    }

    /// Cached reading for the caller, using the configured max distance.
    pub fn get_cached_weather(&self, coords: Option<Coordinates>) -> Option<CachedWeather> {
        self.get_cached_weather_within(coords, self.config.max_distance_km)
    }

    /// Cached reading, or `None` if absent, unreadable, or farther than
    /// `max_distance_km` from `coords`.
    ///
    /// Migrates the legacy record on first use. Freshness is recomputed; an
    /// expired reading is still returned so the caller can decide with
    /// [`should_use_cache`].
    pub fn get_cached_weather_within(
        &self,
        coords: Option<Coordinates>,
        max_distance_km: f64,
    ) -> Option<CachedWeather> {
        let cached = match self.read_slot(PRIMARY_KEY) {
            Some(cached) => cached,
            None => self.migrate_legacy()?,
        };
        let cached = self.refresh_tier(cached);

        if let Some(coords) = coords {
            let distance = get_distance_km(coords, cached.weather.coordinates());
            // NaN coordinates never count as nearby
            if !(distance <= max_distance_km) {
                tracing::debug!(
                    distance_km = distance,
                    max_distance_km,
                    "Cached weather is too far from the current location"
                );
                return None;
            }
        }

        Some(cached)
    }

    /// Last reading stored for one provider.
    pub fn get_provider_cache(&self, provider: &ProviderId) -> Option<CachedWeather> {
        self.read_slot(&provider_key(provider))
            .map(|cached| self.refresh_tier(cached))
    }

    /// Every per-provider snapshot, sorted by provider.
    pub fn list_provider_caches(&self) -> Vec<CachedWeather> {
        let keys = match self.store.list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list weather cache keys: {}", e);
                return Vec::new();
            }
        };

        let mut caches: Vec<CachedWeather> = keys
            .iter()
            .filter(|key| key.starts_with(PROVIDER_KEY_PREFIX))
            .filter_map(|key| self.read_slot(key))
            .map(|cached| self.refresh_tier(cached))
            .collect();
        caches.sort_by(|a, b| a.weather.provider.cmp(&b.weather.provider));
        caches
    }

    /// Remove the primary slot, the legacy record and every provider slot.
    pub fn clear_weather_cache(&self) {
        let _guard = self.write_lock.lock();
        let mut keys = vec![PRIMARY_KEY.to_string(), LEGACY_KEY.to_string()];
        match self.store.list_keys() {
            Ok(all) => keys.extend(all.into_iter().filter(|k| k.starts_with(PROVIDER_KEY_PREFIX))),
            Err(e) => tracing::warn!("Failed to list weather cache keys: {}", e),
        }

        for key in &keys {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key = %key, "Failed to remove weather cache entry: {}", e);
            }
        }
        tracing::info!("Weather cache cleared");
    }

    fn refresh_tier(&self, mut cached: CachedWeather) -> CachedWeather {
        cached.freshness = self.calculate_freshness(cached.cached_at);
        cached
    }

    fn read_slot(&self, key: &str) -> Option<CachedWeather> {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %key, "Failed to read weather cache: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(key = %key, "Ignoring unreadable weather cache entry: {}", e);
                None
            }
        }
    }

    /// One-time import of the legacy single-record cache.
    ///
    /// Writes only if the primary slot is still empty or unreadable; whichever
    /// value ends up in the primary slot is returned.
    fn migrate_legacy(&self) -> Option<CachedWeather> {
        let _guard = self.write_lock.lock();

        let raw = match self.store.get(LEGACY_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Failed to read legacy weather cache: {}", e);
                return None;
            }
        };

        let provider = self.config.legacy_provider.clone();
        let migrated = serde_json::from_str::<LegacyRecord>(&raw)
            .ok()
            .and_then(|record| record.into_cached(provider));
        let Some(migrated) = migrated else {
            tracing::warn!("Discarding unreadable legacy weather cache");
            self.remove_legacy();
            return None;
        };

        let json = match serde_json::to_string(&migrated) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize migrated weather cache: {}", e);
                return None;
            }
        };

        match self.store.set_if_absent(PRIMARY_KEY, &json) {
            Ok(true) => {
                let slot = provider_key(&migrated.weather.provider);
                if let Err(e) = self.store.set_if_absent(&slot, &json) {
                    tracing::warn!("Failed to write migrated provider cache: {}", e);
                }
                self.remove_legacy();
                tracing::info!(
                    provider = %migrated.weather.provider,
                    "Migrated legacy weather cache"
                );
                Some(migrated)
            }
            Ok(false) => match self.read_slot(PRIMARY_KEY) {
                Some(current) => {
                    tracing::debug!(
                        "Primary weather cache already populated, dropping legacy record"
                    );
                    self.remove_legacy();
                    Some(current)
                }
                None => {
                    // Unreadable primary: the legacy record is the only usable reading
                    if let Err(e) = self.store.set(PRIMARY_KEY, &json) {
                        tracing::warn!("Failed to replace unreadable weather cache: {}", e);
                        return Some(migrated);
                    }
                    let slot = provider_key(&migrated.weather.provider);
                    if let Err(e) = self.store.set_if_absent(&slot, &json) {
                        tracing::warn!("Failed to write migrated provider cache: {}", e);
                    }
                    self.remove_legacy();
                    tracing::info!(
                        provider = %migrated.weather.provider,
                        "Replaced unreadable weather cache with legacy record"
                    );
                    Some(migrated)
                }
            },
            Err(e) => {
                tracing::warn!("Failed to write migrated weather cache: {}", e);
                None
            }
        }
    }

    fn remove_legacy(&self) {
        if let Err(e) = self.store.remove(LEGACY_KEY) {
            tracing::warn!("Failed to remove legacy weather cache: {}", e);
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .finish()
    }
}
