pub mod config;
mod error;
mod logging;
pub mod runtime;
pub mod services;

pub use error::AppError;

fn bootstrap() -> Result<config::AppConfig, AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        telemetry_script_path = %config.telemetry_script_path,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        telemetry_interval_ms = config.telemetry_interval_ms,
        weather_interval_ms = config.weather_interval_ms,
        insight_interval_ms = config.insight_interval_ms,
        history_capacity = config.history_capacity,
        insight_profile = ?config.insight_profile,
        "application bootstrap initialized"
    );

    Ok(config)
}

/// Pipeline plus HTTP API.
pub fn run() -> Result<(), AppError> {
    runtime::run(bootstrap()?)
}

/// Pipeline only, no HTTP server.
pub fn run_service() -> Result<(), AppError> {
    runtime::run_headless(bootstrap()?)
}
