use crate::adapters::open_meteo::DEFAULT_API_BASE;
use crate::app::AppError;
use crate::domain::aggregator::{DEFAULT_MIN_HISTORY_DEPTH, InsightProfile};
use crate::domain::history::{MAX_HISTORY_CAPACITY, MIN_HISTORY_CAPACITY};
use crate::domain::metrics::BatteryProfile;
use crate::domain::prediction_engine::DEFAULT_RETRAIN_CONFIDENCE;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telemetry_script_path: String,
    pub db_path: String,
    pub http_bind: String,
    pub telemetry_interval_ms: u64,
    pub weather_interval_ms: u64,
    pub insight_interval_ms: u64,
    pub weather_api_base: String,
    pub weather_latitude: f64,
    pub weather_longitude: f64,
    pub history_capacity: usize,
    pub min_history_depth: usize,
    pub insight_profile: InsightProfile,
    pub battery: BatteryProfile,
    pub retrain_confidence: f64,
}

impl AppConfig {
    /// Reads `.env` when present, then the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(AppError::config(format!("failed to read .env: {err}"))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telemetry_script_path = non_empty(&lookup, "TELEMETRY_SCRIPT_PATH")
            .ok_or_else(|| AppError::config("TELEMETRY_SCRIPT_PATH is required"))?;

        let history_capacity = parse_or_default(&lookup, "HISTORY_CAPACITY", MAX_HISTORY_CAPACITY)?;
        if !(MIN_HISTORY_CAPACITY..=MAX_HISTORY_CAPACITY).contains(&history_capacity) {
            return Err(AppError::config(format!(
                "HISTORY_CAPACITY must be between {MIN_HISTORY_CAPACITY} and {MAX_HISTORY_CAPACITY}"
            )));
        }

        let min_history_depth =
            parse_or_default(&lookup, "MIN_HISTORY_DEPTH", DEFAULT_MIN_HISTORY_DEPTH)?;
        if min_history_depth > history_capacity {
            return Err(AppError::config(format!(
                "MIN_HISTORY_DEPTH must not exceed HISTORY_CAPACITY ({history_capacity})"
            )));
        }

        let telemetry_interval_ms = parse_or_default(&lookup, "TELEMETRY_INTERVAL_MS", 10_000_u64)?;
        let weather_interval_ms = parse_or_default(&lookup, "WEATHER_INTERVAL_MS", 3_600_000_u64)?;
        let insight_interval_ms = parse_or_default(&lookup, "INSIGHT_INTERVAL_MS", 30_000_u64)?;
        for (key, value) in [
            ("TELEMETRY_INTERVAL_MS", telemetry_interval_ms),
            ("WEATHER_INTERVAL_MS", weather_interval_ms),
            ("INSIGHT_INTERVAL_MS", insight_interval_ms),
        ] {
            if value == 0 {
                return Err(AppError::config(format!("{key} must be greater than zero")));
            }
        }

        let insight_profile = match non_empty(&lookup, "INSIGHT_PROFILE")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("simple") => InsightProfile::Simple,
            Some("extended") => InsightProfile::Extended,
            Some(_) => {
                return Err(AppError::config(
                    "INSIGHT_PROFILE must be one of: simple, extended",
                ));
            }
        };

        let defaults = BatteryProfile::default();
        let battery = BatteryProfile {
            vmin: parse_or_default(&lookup, "BATTERY_VMIN", defaults.vmin)?,
            vmax: parse_or_default(&lookup, "BATTERY_VMAX", defaults.vmax)?,
            critical_level: parse_or_default(
                &lookup,
                "BATTERY_CRITICAL_LEVEL",
                defaults.critical_level,
            )?,
            danger_temperature_c: parse_or_default(
                &lookup,
                "BATTERY_DANGER_TEMP_C",
                defaults.danger_temperature_c,
            )?,
            healthy_temperature_limit_c: parse_or_default(
                &lookup,
                "BATTERY_HEALTHY_TEMP_LIMIT_C",
                defaults.healthy_temperature_limit_c,
            )?,
            plausible_min_voltage: parse_or_default(
                &lookup,
                "SENSOR_MIN_VOLTAGE",
                defaults.plausible_min_voltage,
            )?,
            plausible_max_voltage: parse_or_default(
                &lookup,
                "SENSOR_MAX_VOLTAGE",
                defaults.plausible_max_voltage,
            )?,
        }
        .validate()
        .map_err(AppError::config)?;

        let retrain_confidence = parse_or_default(
            &lookup,
            "PREDICTOR_RETRAIN_CONFIDENCE",
            DEFAULT_RETRAIN_CONFIDENCE,
        )?;
        if !(0.0..=100.0).contains(&retrain_confidence) {
            return Err(AppError::config(
                "PREDICTOR_RETRAIN_CONFIDENCE must be within 0..=100",
            ));
        }

        Ok(Self {
            telemetry_script_path,
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/solar-insights/insights.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            telemetry_interval_ms,
            weather_interval_ms,
            insight_interval_ms,
            weather_api_base: non_empty(&lookup, "WEATHER_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            weather_latitude: parse_or_default(&lookup, "WEATHER_LATITUDE", 6.5244_f64)?,
            weather_longitude: parse_or_default(&lookup, "WEATHER_LONGITUDE", 3.3792_f64)?,
            history_capacity,
            min_history_depth,
            insight_profile,
            battery,
            retrain_confidence,
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
