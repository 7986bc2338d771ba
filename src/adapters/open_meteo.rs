use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::clock::TimestampMs;
use crate::domain::weather::WeatherSnapshot;

pub const DEFAULT_API_BASE: &str = "https://api.open-meteo.com/v1";
const REQUEST_TIMEOUT_SECONDS: u64 = 30;
const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code,is_day";

pub trait WeatherSource: Send + Sync + 'static {
    fn fetch_current(&self, fetched_at: TimestampMs) -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("failed to build weather client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("weather request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("weather service returned status {0}")]
    Status(u16),
    #[error("weather response is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    weather_code: Option<u16>,
    is_day: Option<u8>,
}

pub struct OpenMeteoClient {
    client: reqwest::blocking::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl OpenMeteoClient {
    pub fn new(base_url: &str, latitude: f64, longitude: f64) -> Result<Self, WeatherError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(WeatherError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude,
            longitude,
        })
    }

    fn forecast_url(&self) -> String {
        format!(
            "{}/forecast?latitude={:.4}&longitude={:.4}&current={CURRENT_FIELDS}",
            self.base_url, self.latitude, self.longitude
        )
    }
}

impl WeatherSource for OpenMeteoClient {
    fn fetch_current(&self, fetched_at: TimestampMs) -> Result<WeatherSnapshot, WeatherError> {
        let url = self.forecast_url();
        tracing::debug!(%url, "fetching current weather");

        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body: ForecastResponse = response.json()?;
        parse_current(body, fetched_at)
    }
}

fn parse_current(
    body: ForecastResponse,
    fetched_at: TimestampMs,
) -> Result<WeatherSnapshot, WeatherError> {
    let current = body.current.ok_or(WeatherError::MissingField("current"))?;
    let temperature_c = current
        .temperature_2m
        .ok_or(WeatherError::MissingField("temperature_2m"))?;
    let weather_code = current
        .weather_code
        .ok_or(WeatherError::MissingField("weather_code"))?;

    Ok(WeatherSnapshot::from_observation(
        temperature_c,
        current.relative_humidity_2m.unwrap_or(0.0),
        current.wind_speed_10m.unwrap_or(0.0),
        weather_code,
        current.is_day.map_or(true, |flag| flag != 0),
        fetched_at,
    ))
}
