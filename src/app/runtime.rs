use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use thiserror::Error;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::open_meteo::{OpenMeteoClient, WeatherError, WeatherSource};
use crate::adapters::store::{KeyValueStore, SqliteStore};
use crate::adapters::telemetry_script::{
    ScriptedTelemetrySource, TelemetrySource, TelemetrySourceError,
};
use crate::app::config::AppConfig;
use crate::app::AppError;
use crate::app::services::{
    CycleOutcome, InsightService, InsightSettings, PipelineState, ServiceError,
};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::metrics::{BatteryProfile, DerivedMetrics, derive_metrics};
use crate::domain::telemetry::normalize_sample;

const CANCELLATION_SLICE: Duration = Duration::from_millis(100);

/// Shared stop flag for every periodic loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` in short slices. Returns `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCELLATION_SLICE));
        }
    }
}

/// Runs `tick` immediately and then every `interval` until the token is
/// cancelled. A tick returning `Break` cancels the token for every loop.
pub fn spawn_periodic<F>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    mut tick: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while !token.is_cancelled() {
                if tick().is_break() {
                    token.cancel();
                    break;
                }
                if !token.sleep(interval) {
                    break;
                }
            }
            tracing::debug!(task = name, "periodic loop stopped");
        })
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read telemetry: {0}")]
    Source(#[source] TelemetrySourceError),
    #[error("failed to update pipeline state: {0}")]
    State(#[source] ServiceError),
}

pub struct TelemetryIngestor<S, C> {
    source: S,
    clock: C,
    state: Arc<PipelineState>,
    profile: BatteryProfile,
}

impl<S, C> TelemetryIngestor<S, C>
where
    S: TelemetrySource,
    C: Clock,
{
    pub fn new(source: S, clock: C, state: Arc<PipelineState>, profile: BatteryProfile) -> Self {
        Self {
            source,
            clock,
            state,
            profile,
        }
    }

    pub fn tick(&mut self) -> Result<DerivedMetrics, IngestError> {
        let sample = self.source.next_sample().map_err(IngestError::Source)?;
        let reading = normalize_sample(&sample);

        let previous = self.state.latest_metrics().map_err(IngestError::State)?;
        let metrics = derive_metrics(&reading, previous.as_ref(), &self.profile);
        let history_depth = self
            .state
            .record_metrics(metrics, self.clock.now())
            .map_err(IngestError::State)?;

        if metrics.sensor_error {
            tracing::warn!(
                battery_voltage = metrics.battery_voltage,
                "battery voltage outside plausible range, level alerts suppressed"
            );
        }
        tracing::debug!(
            history_depth,
            battery_level = metrics.battery_level,
            load_power = metrics.load_power,
            active_source = ?metrics.active_source,
            "telemetry sample ingested"
        );

        Ok(metrics)
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to fetch weather: {0}")]
    Fetch(#[source] WeatherError),
    #[error("failed to update pipeline state: {0}")]
    State(#[source] ServiceError),
}

pub struct WeatherRefresher<W, C> {
    source: W,
    clock: C,
    state: Arc<PipelineState>,
}

impl<W, C> WeatherRefresher<W, C>
where
    W: WeatherSource,
    C: Clock,
{
    pub fn new(source: W, clock: C, state: Arc<PipelineState>) -> Self {
        Self {
            source,
            clock,
            state,
        }
    }

    /// On failure the previous snapshot stays in place.
    pub fn tick(&mut self) -> Result<(), RefreshError> {
        let snapshot = self
            .source
            .fetch_current(self.clock.now())
            .map_err(RefreshError::Fetch)?;

        tracing::info!(
            temperature_c = snapshot.temperature_c,
            weather_code = snapshot.weather_code,
            description = %snapshot.description,
            "weather refreshed"
        );
        self.state
            .record_weather(snapshot)
            .map_err(RefreshError::State)
    }
}

pub struct InsightCycle<C> {
    service: Arc<InsightService>,
    state: Arc<PipelineState>,
    clock: C,
}

impl<C> InsightCycle<C>
where
    C: Clock,
{
    pub fn new(service: Arc<InsightService>, state: Arc<PipelineState>, clock: C) -> Self {
        Self {
            service,
            state,
            clock,
        }
    }

    pub fn tick(&mut self) -> Result<CycleOutcome, ServiceError> {
        let snapshot = self.state.snapshot()?;
        self.service
            .run_cycle(&snapshot, self.clock.local_hour(), self.clock.now())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineIntervals {
    pub telemetry: Duration,
    pub weather: Duration,
    pub insight: Duration,
}

impl PipelineIntervals {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            telemetry: Duration::from_millis(config.telemetry_interval_ms),
            weather: Duration::from_millis(config.weather_interval_ms),
            insight: Duration::from_millis(config.insight_interval_ms),
        }
    }
}

/// The three running loops and the token that stops them.
pub struct Pipeline {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    pub fn spawn<S, W, C>(
        mut ingestor: TelemetryIngestor<S, C>,
        mut refresher: WeatherRefresher<W, C>,
        mut cycle: InsightCycle<C>,
        intervals: PipelineIntervals,
    ) -> Result<Self, AppError>
    where
        S: TelemetrySource,
        W: WeatherSource,
        C: Clock + Send + 'static,
    {
        let token = CancellationToken::default();
        let mut pipeline = Self {
            token: token.clone(),
            handles: Vec::with_capacity(3),
        };

        pipeline.start(
            "telemetry",
            intervals.telemetry,
            move || match ingestor.tick() {
                Ok(_) => ControlFlow::Continue(()),
                Err(IngestError::Source(err)) if err.is_exhausted() => {
                    tracing::info!("telemetry replay exhausted, stopping pipeline");
                    ControlFlow::Break(())
                }
                Err(err) => {
                    tracing::warn!(error = %err, "telemetry tick failed");
                    ControlFlow::Continue(())
                }
            },
        )?;
        pipeline.start("weather", intervals.weather, move || {
            if let Err(err) = refresher.tick() {
                tracing::warn!(error = %err, "weather refresh failed, keeping previous snapshot");
            }
            ControlFlow::Continue(())
        })?;
        pipeline.start("insights", intervals.insight, move || {
            if let Err(err) = cycle.tick() {
                tracing::warn!(error = %err, "insight cycle failed");
            }
            ControlFlow::Continue(())
        })?;

        Ok(pipeline)
    }

    fn start<F>(
        &mut self,
        name: &'static str,
        interval: Duration,
        tick: F,
    ) -> Result<(), AppError>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        match spawn_periodic(name, interval, self.token.clone(), tick) {
            Ok(handle) => {
                self.handles.push((name, handle));
                Ok(())
            }
            Err(err) => {
                self.token.cancel();
                Err(AppError::runtime(format!("failed to spawn {name} loop: {err}")))
            }
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels every loop and waits for them to finish.
    pub fn shutdown(self) -> Result<(), AppError> {
        self.token.cancel();
        self.join()
    }

    /// Blocks until the loops stop on their own.
    pub fn wait(self) -> Result<(), AppError> {
        self.join()
    }

    fn join(self) -> Result<(), AppError> {
        let mut panicked = Vec::new();
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        // A panicked loop never cancels on its own.
        self.token.cancel();

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(AppError::runtime(format!(
                "loop thread panicked: {}",
                panicked.join(", ")
            )))
        }
    }
}

struct Components {
    state: Arc<PipelineState>,
    service: Arc<InsightService>,
    pipeline: Pipeline,
}

fn start_components(config: &AppConfig) -> Result<Components, AppError> {
    let store = SqliteStore::open(&config.db_path).map_err(AppError::database_init)?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    let telemetry = ScriptedTelemetrySource::from_file(&config.telemetry_script_path)
        .map_err(AppError::config)?;
    let weather = OpenMeteoClient::new(
        &config.weather_api_base,
        config.weather_latitude,
        config.weather_longitude,
    )
    .map_err(AppError::runtime)?;

    let state = Arc::new(PipelineState::new(config.history_capacity));
    let service = Arc::new(InsightService::load(
        store,
        InsightSettings {
            profile: config.insight_profile,
            min_history_depth: config.min_history_depth,
            retrain_confidence: config.retrain_confidence,
        },
    ));

    let pipeline = Pipeline::spawn(
        TelemetryIngestor::new(telemetry, SystemClock, Arc::clone(&state), config.battery),
        WeatherRefresher::new(weather, SystemClock, Arc::clone(&state)),
        InsightCycle::new(Arc::clone(&service), Arc::clone(&state), SystemClock),
        PipelineIntervals::from_config(config),
    )?;

    Ok(Components {
        state,
        service,
        pipeline,
    })
}

/// Pipeline plus HTTP API until the server stops.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let Components {
        state,
        service,
        pipeline,
    } = start_components(&config)?;

    let api_state = ApiState {
        insights: service,
        pipeline: state,
    };
    let http_bind = config.http_bind.clone();

    tracing::info!(bind = %http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&http_bind)?
        .run()
        .await
    });

    tracing::info!("http server stopped, shutting down pipeline");
    pipeline.shutdown()?;

    server_result.map_err(AppError::runtime)
}

/// Pipeline without HTTP. Returns once the loops stop.
pub fn run_headless(config: AppConfig) -> Result<(), AppError> {
    let Components { pipeline, .. } = start_components(&config)?;
    tracing::info!("headless pipeline running");
    pipeline.wait()
}
