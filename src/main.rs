use std::sync::Arc;

use anyhow::{Context, Result};
use stormgate_core::Config;
use stormgate_weather::{
    provider::providers_from_config, CircuitBreakerRegistry, Coordinates, FallbackOrchestrator,
    FetchOutcome, SqliteStore, TieredCache,
};

/// Parse `<lat> <lon>` from the command line, if given.
fn coordinates_from_args() -> Result<Option<Coordinates>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(None),
        [lat, lon] => {
            let latitude: f64 = lat.parse().context("Latitude must be a number")?;
            let longitude: f64 = lon.parse().context("Longitude must be a number")?;
            Ok(Some(Coordinates::new(latitude, longitude)))
        }
        _ => anyhow::bail!("Usage: stormgate [<latitude> <longitude>]"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    stormgate_core::init()?;

    let (config, _) = Config::load_validated()?;
    let weather = &config.weather;

    std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;
    let store = SqliteStore::new(config.data_dir.join("weather.db"))
        .context("Failed to open weather store")?;

    let registry = Arc::new(CircuitBreakerRegistry::new());
    let cache = Arc::new(TieredCache::new(Arc::new(store), weather.cache.clone()));
    let orchestrator = FallbackOrchestrator::new(registry, cache);

    println!("Stormgate - weather resilience layer");
    println!("  Data directory: {}", config.data_dir.display());

    let Some(coords) = coordinates_from_args()? else {
        match orchestrator.cache().get_cached_weather(None) {
            Some(cached) => {
                println!(
                    "  Cached: {:.1}°F at {} from {} ({}, {} min old)",
                    cached.weather.temperature,
                    cached.weather.location_name,
                    cached.weather.provider,
                    cached.freshness,
                    orchestrator.cache().get_cache_age_minutes(cached.cached_at)
                );
            }
            None => println!("  Cached: none"),
        }
        return Ok(());
    };

    let providers = providers_from_config(weather)?;
    let result = orchestrator
        .get_weather(coords, &providers, &weather.circuit_breaker, &weather.retry)
        .await;

    match result {
        Ok(outcome) => {
            let reading = outcome.weather();
            let source = match &outcome {
                FetchOutcome::Live(_) => "live",
                FetchOutcome::Cached(_) => "cached",
            };
            println!(
                "  {:.1}°F, {:.2} inHg, wind {:.0} mph @ {:.0}° at {} ({} via {})",
                reading.temperature,
                reading.pressure,
                reading.wind_speed,
                reading.wind_direction,
                reading.location_name,
                source,
                reading.provider
            );
            if let Some(message) = outcome.freshness_message() {
                println!("  Note: {}", message);
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            println!("  {}", e.user_message());
        }
    }

    for snapshot in orchestrator.registry().snapshot(&weather.circuit_breaker) {
        println!(
            "  Circuit {}: {} ({} recent failures, retry in {:?})",
            snapshot.provider, snapshot.state, snapshot.recent_failures, snapshot.retry_in
        );
    }

    Ok(())
}
