use serde::{Deserialize, Serialize};

use crate::domain::clock::TimestampMs;

pub const UNKNOWN_WEATHER_DESCRIPTION: &str = "Unknown weather";
pub const UNKNOWN_WEATHER_ICON: &str = "❓";

const CLOUDY_CODES: &[u16] = &[2, 3, 45];
const RAIN_CODES: &[u16] = &[51, 53, 55, 61, 63, 65, 80, 81, 82];
const THUNDERSTORM_CODES: &[u16] = &[95, 96, 99];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub wind_speed_kmh: f64,
    pub weather_code: u16,
    pub is_day: bool,
    pub description: String,
    pub icon: String,
    pub fetched_at: TimestampMs,
}

impl WeatherSnapshot {
    /// Fills description and glyph from the WMO lookup table.
    pub fn from_observation(
        temperature_c: f64,
        humidity_percent: f64,
        wind_speed_kmh: f64,
        weather_code: u16,
        is_day: bool,
        fetched_at: TimestampMs,
    ) -> Self {
        let condition = describe_weather_code(weather_code, is_day);
        Self {
            temperature_c,
            humidity_percent,
            wind_speed_kmh,
            weather_code,
            is_day,
            description: condition.description.to_string(),
            icon: condition.icon.to_string(),
            fetched_at,
        }
    }

    pub fn is_cloudy(&self) -> bool {
        CLOUDY_CODES.contains(&self.weather_code)
    }

    pub fn is_rainy(&self) -> bool {
        RAIN_CODES.contains(&self.weather_code)
    }

    pub fn is_thunderstorm(&self) -> bool {
        THUNDERSTORM_CODES.contains(&self.weather_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeatherCondition {
    pub description: &'static str,
    pub icon: &'static str,
}

const fn condition(description: &'static str, icon: &'static str) -> WeatherCondition {
    WeatherCondition { description, icon }
}

pub fn describe_weather_code(code: u16, is_day: bool) -> WeatherCondition {
    match code {
        0 if is_day => condition("Clear sky", "☀️"),
        0 => condition("Clear sky", "🌙"),
        1 if is_day => condition("Mainly clear", "🌤️"),
        1 => condition("Mainly clear", "🌙"),
        2 => condition("Partly cloudy", "⛅"),
        3 => condition("Overcast", "☁️"),
        45 => condition("Fog", "🌫️"),
        51 => condition("Light drizzle", "🌦️"),
        53 => condition("Moderate drizzle", "🌦️"),
        55 => condition("Dense drizzle", "🌧️"),
        61 => condition("Slight rain", "🌧️"),
        63 => condition("Moderate rain", "🌧️"),
        65 => condition("Heavy rain", "🌧️"),
        71 => condition("Slight snow fall", "🌨️"),
        73 => condition("Moderate snow fall", "🌨️"),
        75 => condition("Heavy snow fall", "❄️"),
        80 => condition("Slight rain showers", "🌦️"),
        81 => condition("Moderate rain showers", "🌧️"),
        82 => condition("Violent rain showers", "⛈️"),
        85 => condition("Slight snow showers", "🌨️"),
        86 => condition("Heavy snow showers", "❄️"),
        95 => condition("Thunderstorm", "⛈️"),
        96 => condition("Thunderstorm with slight hail", "⛈️"),
        99 => condition("Thunderstorm with heavy hail", "⛈️"),
        _ => condition(UNKNOWN_WEATHER_DESCRIPTION, UNKNOWN_WEATHER_ICON),
    }
}
