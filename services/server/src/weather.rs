//! Outdoor temperature lookup.
//!
//! Queries a met.no-style locationforecast endpoint for the configured
//! coordinates and extracts the first `air_temperature` from the returned
//! timeseries.  The parsed value is cached for an hour; the cache sits
//! behind an async mutex so concurrent HTTP callers cannot trigger
//! duplicate upstream fetches.  An hourly sampler task appends each reading
//! to the outside-temperature history table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::Db;

const DEFAULT_BASE_URL: &str = "https://api.met.no/weatherapi/locationforecast/2.0/compact";

const CACHE_TTL: Duration = Duration::from_secs(3600);

const SAMPLE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("forecast carries no air_temperature")]
    NoTemperature,
}

#[derive(Clone)]
pub struct Weather {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    cache: Mutex<Option<Cached>>,
}

struct Cached {
    fetched: Instant,
    temp: f64,
}

impl Weather {
    pub fn new(latitude: f64, longitude: f64) -> Weather {
        Self::with_base_url(latitude, longitude, DEFAULT_BASE_URL.to_owned())
    }

    /// Point the fetcher at a different endpoint (tests use a local mock).
    pub fn with_base_url(latitude: f64, longitude: f64, base_url: String) -> Weather {
        Weather {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                base_url,
                latitude,
                longitude,
                cache: Mutex::new(None),
            }),
        }
    }

    /// Current outdoor temperature, served from cache within the TTL.
    pub async fn current(&self) -> Result<f64, WeatherError> {
        // Holding the cache lock across the fetch serializes refreshes.
        let mut cache = self.inner.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched.elapsed() < CACHE_TTL {
                return Ok(cached.temp);
            }
        }
        let temp = self.fetch().await?;
        *cache = Some(Cached {
            fetched: Instant::now(),
            temp,
        });
        Ok(temp)
    }

    async fn fetch(&self) -> Result<f64, WeatherError> {
        let response = self
            .inner
            .client
            .get(&self.inner.base_url)
            .header(
                reqwest::header::USER_AGENT,
                concat!("besim-server/", env!("CARGO_PKG_VERSION")),
            )
            .query(&[
                ("lat", self.inner.latitude.to_string()),
                ("lon", self.inner.longitude.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let forecast: Forecast = response.json().await?;

        let temp = forecast
            .properties
            .timeseries
            .iter()
            .find_map(|step| step.data.instant.details.air_temperature)
            .ok_or(WeatherError::NoTemperature)?;
        debug!(temp, "fetched outdoor temperature");
        Ok(temp)
    }
}

/// Hourly sampler: fetch (or reuse the cache) and append to the history
/// table.  Failures are logged and retried on the next tick.
pub async fn run_sampler(weather: Weather, db: Db) {
    let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        interval.tick().await;
        match weather.current().await {
            Ok(temp) => {
                if let Err(e) = db.log_outside_temperature(temp) {
                    warn!(error = %e, "failed to record outside temperature");
                }
            }
            Err(e) => warn!(error = %e, "weather fetch failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast document (the subset we read)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Forecast {
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    timeseries: Vec<TimeStep>,
}

#[derive(Debug, Deserialize)]
struct TimeStep {
    data: StepData,
}

#[derive(Debug, Deserialize)]
struct StepData {
    instant: InstantBlock,
}

#[derive(Debug, Deserialize)]
struct InstantBlock {
    details: InstantDetails,
}

#[derive(Debug, Deserialize)]
struct InstantDetails {
    air_temperature: Option<f64>,
}
