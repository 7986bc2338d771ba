use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::store::SqliteStore;
use crate::domain::clock::TimestampMs;
use crate::domain::history::{HistoryBuffer, MAX_HISTORY_CAPACITY, PowerPoint};
use crate::domain::metrics::DerivedMetrics;
use crate::domain::telemetry::ActiveSource;
use crate::domain::weather::WeatherSnapshot;

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh migrated store copied from a shared template database.
pub fn temp_sqlite_store(test_name: &str) -> SqliteStore {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    let connection =
        open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open");
    SqliteStore::new(Arc::new(Mutex::new(connection)))
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| Path::new("./target/testdb/template.sqlite").to_path_buf());

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb").join(format!("{test_name}-{now}-{counter}.sqlite"))
}

/// Healthy solar-powered metrics with the given battery level and temperature.
pub fn metrics_with(battery_level: f64, battery_temperature_c: f64) -> DerivedMetrics {
    DerivedMetrics {
        solar_power: 800.0,
        grid_power: 0.0,
        battery_power: 0.0,
        load_power: 800.0,
        battery_level,
        efficiency: 100.0,
        level_change: 0.0,
        battery_voltage: 12.6,
        battery_temperature_c,
        active_source: ActiveSource::Solar,
        is_charging: false,
        battery_critical: false,
        battery_danger: false,
        system_healthy: true,
        sensor_error: false,
    }
}

/// History of `(battery_level, solar_power, consumption)` points, ten seconds apart.
pub fn history_from(points: &[(f64, f64, f64)]) -> HistoryBuffer {
    let mut history = HistoryBuffer::new(MAX_HISTORY_CAPACITY);
    for (index, (battery_level, solar_power, consumption)) in points.iter().enumerate() {
        history.push(PowerPoint {
            timestamp: TimestampMs(index as i64 * 10_000),
            solar_power: *solar_power,
            grid_power: 0.0,
            battery_level: *battery_level,
            consumption: *consumption,
            charging_power: 0.0,
        });
    }
    history
}

pub fn weather_with(weather_code: u16, temperature_c: f64) -> WeatherSnapshot {
    WeatherSnapshot::from_observation(temperature_c, 70.0, 10.0, weather_code, true, TimestampMs(0))
}
