use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::store::{
    KeyValueStore, PREDICTION_CACHE_KEY, PREDICTOR_MODEL_KEY, PREFERENCES_KEY, StoreError,
    load_json, save_json,
};
use crate::domain::aggregator::{InsightAggregator, InsightProfile, UserPreferences};
use crate::domain::clock::TimestampMs;
use crate::domain::history::{HistoryBuffer, PowerPoint};
use crate::domain::insight::{Insight, InsightType, Priority};
use crate::domain::metrics::DerivedMetrics;
use crate::domain::prediction_engine::{PredictionEngine, PredictionOutcome};
use crate::domain::predictor::{
    FeatureVector, Prediction, PredictionCache, Predictor, SoftmaxPredictor,
    is_predictor_insight_id, predictor_insight,
};
use crate::domain::rules::{RuleContext, RuleEngine};
use crate::domain::weather::WeatherSnapshot;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> Result<MutexGuard<'a, T>, ServiceError> {
    mutex.lock().map_err(|_| ServiceError::LockPoisoned(name))
}

/// Consistent copy of the telemetry side taken at the start of a cycle.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub metrics: Option<DerivedMetrics>,
    pub history: HistoryBuffer,
    pub weather: Option<WeatherSnapshot>,
}

#[derive(Debug)]
struct TelemetryState {
    latest: Option<DerivedMetrics>,
    history: HistoryBuffer,
    weather: Option<WeatherSnapshot>,
}

/// Latest metrics, history and weather shared between the ingestion loops,
/// the insight cycle and the HTTP API.
#[derive(Debug)]
pub struct PipelineState {
    inner: Mutex<TelemetryState>,
}

impl PipelineState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TelemetryState {
                latest: None,
                history: HistoryBuffer::new(history_capacity),
                weather: None,
            }),
        }
    }

    pub fn latest_metrics(&self) -> Result<Option<DerivedMetrics>, ServiceError> {
        Ok(lock(&self.inner, "pipeline state")?.latest)
    }

    /// Stores `metrics` as the latest tick and appends its history point.
    /// Returns the resulting history depth.
    pub fn record_metrics(
        &self,
        metrics: DerivedMetrics,
        timestamp: TimestampMs,
    ) -> Result<usize, ServiceError> {
        let mut state = lock(&self.inner, "pipeline state")?;
        state.latest = Some(metrics);
        state.history.push(PowerPoint::from_metrics(timestamp, &metrics));
        Ok(state.history.len())
    }

    pub fn record_weather(&self, snapshot: WeatherSnapshot) -> Result<(), ServiceError> {
        lock(&self.inner, "pipeline state")?.weather = Some(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<CycleSnapshot, ServiceError> {
        let state = lock(&self.inner, "pipeline state")?;
        Ok(CycleSnapshot {
            metrics: state.latest,
            history: state.history.clone(),
            weather: state.weather.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedInsights {
    pub cycle_id: Uuid,
    pub published_at: TimestampMs,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped,
    Published { cycle_id: Uuid, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissOutcome {
    pub newly_dismissed: bool,
    pub retrained: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsightSettings {
    pub profile: InsightProfile,
    pub min_history_depth: usize,
    pub retrain_confidence: f64,
}

pub trait InsightQueryHandler {
    fn latest_insights(&self) -> Result<Option<PublishedInsights>, ServiceError>;
    fn preferences(&self) -> Result<UserPreferences, ServiceError>;
}

pub trait InsightCommandHandler {
    fn dismiss_insight(&self, id: &str) -> Result<DismissOutcome, ServiceError>;
    fn update_filters(
        &self,
        priorities: BTreeSet<Priority>,
        types: BTreeSet<InsightType>,
    ) -> Result<UserPreferences, ServiceError>;
    fn reset_preferences(&self) -> Result<UserPreferences, ServiceError>;
}

/// Single owner of preferences, predictor state and the published list.
pub struct InsightService {
    store: Arc<dyn KeyValueStore>,
    rules: RuleEngine,
    aggregator: InsightAggregator,
    preferences: Mutex<UserPreferences>,
    engine: Mutex<PredictionEngine>,
    published: RwLock<Option<PublishedInsights>>,
    // Features behind each predictor insight of the latest cycle, keyed by id.
    predictor_features: Mutex<HashMap<String, FeatureVector>>,
}

impl InsightService {
    /// Restores persisted state. Corrupt records are logged and replaced by
    /// defaults; an unreadable model leaves the predictor unavailable.
    pub fn load(store: Arc<dyn KeyValueStore>, settings: InsightSettings) -> Self {
        let preferences = match load_json::<UserPreferences>(store.as_ref(), PREFERENCES_KEY) {
            Ok(Some(preferences)) => preferences.normalized(),
            Ok(None) => UserPreferences::default(),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable preferences");
                UserPreferences::default()
            }
        };

        let cache = match load_json::<PredictionCache>(store.as_ref(), PREDICTION_CACHE_KEY) {
            Ok(cache) => cache.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable prediction cache");
                PredictionCache::default()
            }
        };

        let predictor = match store.get(PREDICTOR_MODEL_KEY) {
            Ok(None) => {
                tracing::info!("no stored predictor model, bootstrapping");
                Some(Box::new(SoftmaxPredictor::bootstrap()) as Box<dyn Predictor>)
            }
            Ok(Some(state)) => match SoftmaxPredictor::from_state(&state) {
                Ok(predictor) => Some(Box::new(predictor) as Box<dyn Predictor>),
                Err(err) => {
                    tracing::warn!(error = %err, "stored predictor model unusable, predictor disabled");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to read predictor model, predictor disabled");
                None
            }
        };

        Self::with_predictor(store, settings, preferences, predictor, cache)
    }

    pub fn with_predictor(
        store: Arc<dyn KeyValueStore>,
        settings: InsightSettings,
        preferences: UserPreferences,
        predictor: Option<Box<dyn Predictor>>,
        cache: PredictionCache,
    ) -> Self {
        let rules = RuleEngine::default();
        tracing::debug!(
            rules = ?rules.rule_names().collect::<Vec<_>>(),
            predictor_available = predictor.is_some(),
            profile = ?settings.profile,
            "insight service configured"
        );

        Self {
            store,
            rules,
            aggregator: InsightAggregator::new(settings.profile, settings.min_history_depth),
            preferences: Mutex::new(preferences),
            engine: Mutex::new(PredictionEngine::new(
                predictor,
                cache,
                settings.retrain_confidence,
            )),
            published: RwLock::new(None),
            predictor_features: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_cycle(
        &self,
        snapshot: &CycleSnapshot,
        local_hour: u32,
        now: TimestampMs,
    ) -> Result<CycleOutcome, ServiceError> {
        let (Some(metrics), Some(weather)) = (snapshot.metrics.as_ref(), snapshot.weather.as_ref())
        else {
            tracing::debug!(
                has_metrics = snapshot.metrics.is_some(),
                has_weather = snapshot.weather.is_some(),
                "insight cycle skipped, inputs incomplete"
            );
            return Ok(CycleOutcome::Skipped);
        };
        if !self
            .aggregator
            .is_ready(snapshot.history.len(), true, true)
        {
            tracing::debug!(
                history_depth = snapshot.history.len(),
                "insight cycle skipped, history too short"
            );
            return Ok(CycleOutcome::Skipped);
        }

        let mut candidates = self.rules.evaluate(&RuleContext {
            metrics,
            history: &snapshot.history,
            weather: Some(weather),
            local_hour,
            now,
        });

        let features = FeatureVector::from_snapshot(metrics, weather);
        // An implausible reading never reaches the predictor, its cache or
        // its self-labelled retraining.
        let prediction = if metrics.sensor_error {
            tracing::debug!("sensor error, predictor skipped for this cycle");
            Prediction::fallback()
        } else {
            self.predict(&features)?
        };
        let mut predictor_features = HashMap::new();
        if let Some(insight) = predictor_insight(&prediction, now) {
            predictor_features.insert(insight.id.clone(), features);
            candidates.push(insight);
        }

        // Held until the list is published so a concurrent dismissal is
        // either reflected here or applied after the write.
        let preferences = lock(&self.preferences, "preferences")?;
        let insights = self.aggregator.aggregate(candidates, &preferences);

        predictor_features.retain(|id, _| insights.iter().any(|insight| &insight.id == id));
        *lock(&self.predictor_features, "predictor features")? = predictor_features;

        let cycle_id = Uuid::new_v4();
        let count = insights.len();
        let mut published = self
            .published
            .write()
            .map_err(|_| ServiceError::LockPoisoned("published insights"))?;
        *published = Some(PublishedInsights {
            cycle_id,
            published_at: now,
            insights,
        });
        drop(published);
        drop(preferences);

        tracing::info!(
            %cycle_id,
            count,
            prediction = prediction.class.label(),
            confidence = prediction.confidence,
            "insights published"
        );

        Ok(CycleOutcome::Published { cycle_id, count })
    }

    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ServiceError> {
        let mut engine = match self.engine.try_lock() {
            Ok(engine) => engine,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("predictor busy, using fallback prediction");
                return Ok(Prediction::fallback());
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(ServiceError::LockPoisoned("prediction engine"));
            }
        };

        let outcome = engine.evaluate(features);
        if let Err(err) = self.persist_engine(&engine, &outcome) {
            tracing::warn!(error = %err, "failed to persist predictor state");
        }
        Ok(outcome.prediction)
    }

    fn persist_engine(
        &self,
        engine: &PredictionEngine,
        outcome: &PredictionOutcome,
    ) -> Result<(), StoreError> {
        if outcome.cache_changed {
            save_json(self.store.as_ref(), PREDICTION_CACHE_KEY, engine.cache())?;
        }
        if outcome.model_changed
            && let Some(state) = engine.export_model()
        {
            self.store.put(PREDICTOR_MODEL_KEY, &state)?;
        }
        Ok(())
    }

    fn persist_preferences(&self, preferences: &UserPreferences) -> Result<(), ServiceError> {
        save_json(self.store.as_ref(), PREFERENCES_KEY, preferences).map_err(|err| {
            tracing::warn!(error = %err, "failed to persist preferences");
            ServiceError::from(err)
        })
    }

    fn retrain_from_dismissal(&self, id: &str) -> Result<bool, ServiceError> {
        if !is_predictor_insight_id(id) {
            return Ok(false);
        }
        let Some(features) = lock(&self.predictor_features, "predictor features")?.remove(id)
        else {
            return Ok(false);
        };

        let mut engine = lock(&self.engine, "prediction engine")?;
        let outcome = engine.apply_feedback(&features);
        tracing::info!(
            insight_id = id,
            class = outcome.prediction.class.label(),
            confidence = outcome.prediction.confidence,
            "predictor corrected from dismissal"
        );
        self.persist_engine(&engine, &outcome).map_err(|err| {
            tracing::warn!(error = %err, "failed to persist corrected predictor");
            ServiceError::from(err)
        })?;

        Ok(outcome.model_changed)
    }
}

impl InsightQueryHandler for InsightService {
    fn latest_insights(&self) -> Result<Option<PublishedInsights>, ServiceError> {
        let published = self
            .published
            .read()
            .map_err(|_| ServiceError::LockPoisoned("published insights"))?;
        Ok(published.clone())
    }

    fn preferences(&self) -> Result<UserPreferences, ServiceError> {
        Ok(lock(&self.preferences, "preferences")?.clone())
    }
}

impl InsightCommandHandler for InsightService {
    fn dismiss_insight(&self, id: &str) -> Result<DismissOutcome, ServiceError> {
        let newly_dismissed = {
            let mut preferences = lock(&self.preferences, "preferences")?;
            let newly_dismissed = preferences.dismiss(id);
            if newly_dismissed && let Err(err) = self.persist_preferences(&preferences) {
                // Undo so a retry persists again instead of reporting a no-op.
                preferences.dismissed.remove(id);
                return Err(err);
            }
            newly_dismissed
        };

        {
            let mut published = self
                .published
                .write()
                .map_err(|_| ServiceError::LockPoisoned("published insights"))?;
            if let Some(published) = published.as_mut() {
                published.insights.retain(|insight| insight.id != id);
            }
        }

        let retrained = self.retrain_from_dismissal(id)?;
        tracing::info!(insight_id = id, newly_dismissed, retrained, "insight dismissed");

        Ok(DismissOutcome {
            newly_dismissed,
            retrained,
        })
    }

    fn update_filters(
        &self,
        priorities: BTreeSet<Priority>,
        types: BTreeSet<InsightType>,
    ) -> Result<UserPreferences, ServiceError> {
        let mut preferences = lock(&self.preferences, "preferences")?;
        preferences.set_filters(priorities, types);
        self.persist_preferences(&preferences)?;
        Ok(preferences.clone())
    }

    fn reset_preferences(&self) -> Result<UserPreferences, ServiceError> {
        let mut preferences = lock(&self.preferences, "preferences")?;
        preferences.reset();
        self.persist_preferences(&preferences)?;
        tracing::info!("preferences reset");
        Ok(preferences.clone())
    }
}
