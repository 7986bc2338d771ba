use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::clock::TimestampMs;
use crate::domain::insight::{Insight, InsightType, Priority};
use crate::domain::metrics::DerivedMetrics;
use crate::domain::weather::WeatherSnapshot;

pub const FEATURE_COUNT: usize = 5;
pub const CLASS_COUNT: usize = 5;
const INPUT_WIDTH: usize = FEATURE_COUNT + 1;

const MODEL_STATE_VERSION: u32 = 1;
const BOOTSTRAP_EPOCHS: usize = 300;
const BOOTSTRAP_LEARNING_RATE: f64 = 0.5;
const RETRAIN_LEARNING_RATE: f64 = 0.25;

// Per-feature (centre, span) used to bring raw units onto a comparable scale.
const FEATURE_SCALING: [(f64, f64); FEATURE_COUNT] = [
    (50.0, 50.0),
    (30.0, 20.0),
    (1500.0, 1500.0),
    (1500.0, 1500.0),
    (25.0, 15.0),
];

const PROTOTYPES: [(PredictionClass, [f64; FEATURE_COUNT]); CLASS_COUNT] = [
    (PredictionClass::Normal, [60.0, 28.0, 800.0, 800.0, 26.0]),
    (PredictionClass::HighConsumption, [55.0, 30.0, 2800.0, 600.0, 28.0]),
    (PredictionClass::BatteryDrain, [15.0, 33.0, 1500.0, 100.0, 27.0]),
    (PredictionClass::ReducedSolar, [50.0, 26.0, 900.0, 150.0, 24.0]),
    (PredictionClass::Optimal, [95.0, 27.0, 500.0, 2500.0, 29.0]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredictionClass {
    Normal,
    HighConsumption,
    BatteryDrain,
    ReducedSolar,
    Optimal,
}

impl PredictionClass {
    pub const ALL: [PredictionClass; CLASS_COUNT] = [
        PredictionClass::Normal,
        PredictionClass::HighConsumption,
        PredictionClass::BatteryDrain,
        PredictionClass::ReducedSolar,
        PredictionClass::Optimal,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::HighConsumption => 1,
            Self::BatteryDrain => 2,
            Self::ReducedSolar => 3,
            Self::Optimal => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::HighConsumption => "high-consumption",
            Self::BatteryDrain => "battery-drain",
            Self::ReducedSolar => "reduced-solar",
            Self::Optimal => "optimal",
        }
    }
}

/// `[battery_level, battery_temperature, consumption, solar_power, ambient_temperature]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn from_snapshot(metrics: &DerivedMetrics, weather: &WeatherSnapshot) -> Self {
        Self([
            metrics.battery_level,
            metrics.battery_temperature_c,
            metrics.load_power,
            metrics.solar_power,
            weather.temperature_c,
        ])
    }

    /// Cache key: every feature at two decimals, joined by `|`.
    pub fn signature(&self) -> String {
        self.0
            .iter()
            .map(|value| format!("{value:.2}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|value| value.is_finite())
    }

    fn scaled(&self) -> [f64; INPUT_WIDTH] {
        let mut input = [1.0; INPUT_WIDTH];
        for (slot, (value, (centre, span))) in input
            .iter_mut()
            .zip(self.0.iter().zip(FEATURE_SCALING.iter()))
        {
            *slot = (value - centre) / span;
        }
        input
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: PredictionClass,
    /// Percentage, 0..=100.
    pub confidence: f64,
    pub explanation: String,
}

impl Prediction {
    /// Result used whenever inference is impossible.
    pub fn fallback() -> Self {
        Self {
            class: PredictionClass::Normal,
            confidence: 0.0,
            explanation: "predictor unavailable".to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictorError {
    #[error("feature vector contains non-finite values")]
    NonFiniteInput,
    #[error("model produced non-finite output")]
    NonFiniteOutput,
    #[error("invalid model state: {0}")]
    InvalidState(String),
}

pub trait Predictor: Send {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError>;
    fn retrain(
        &mut self,
        features: &FeatureVector,
        label: PredictionClass,
    ) -> Result<(), PredictorError>;
    fn export_state(&self) -> Result<String, PredictorError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelState {
    version: u32,
    weights: Vec<Vec<f64>>,
}

/// Multinomial logistic regression over scaled features plus a bias term.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxPredictor {
    weights: [[f64; INPUT_WIDTH]; CLASS_COUNT],
}

impl SoftmaxPredictor {
    /// Deterministic starting model fitted to one prototype sample per class.
    pub fn bootstrap() -> Self {
        let mut predictor = Self {
            weights: [[0.0; INPUT_WIDTH]; CLASS_COUNT],
        };
        for _ in 0..BOOTSTRAP_EPOCHS {
            for (class, features) in PROTOTYPES {
                let input = FeatureVector(features).scaled();
                predictor.sgd_step(&input, class, BOOTSTRAP_LEARNING_RATE);
            }
        }
        predictor
    }

    pub fn from_state(state: &str) -> Result<Self, PredictorError> {
        let state: ModelState = serde_json::from_str(state)
            .map_err(|err| PredictorError::InvalidState(err.to_string()))?;
        if state.version != MODEL_STATE_VERSION {
            return Err(PredictorError::InvalidState(format!(
                "unsupported version {}",
                state.version
            )));
        }
        if state.weights.len() != CLASS_COUNT {
            return Err(PredictorError::InvalidState(format!(
                "expected {CLASS_COUNT} weight rows, got {}",
                state.weights.len()
            )));
        }

        let mut weights = [[0.0; INPUT_WIDTH]; CLASS_COUNT];
        for (target, row) in weights.iter_mut().zip(&state.weights) {
            if row.len() != INPUT_WIDTH || row.iter().any(|value| !value.is_finite()) {
                return Err(PredictorError::InvalidState(
                    "weight row has wrong width or non-finite values".to_string(),
                ));
            }
            target.copy_from_slice(row);
        }

        Ok(Self { weights })
    }

    pub fn class_probabilities(
        &self,
        features: &FeatureVector,
    ) -> Result<[f64; CLASS_COUNT], PredictorError> {
        if !features.is_finite() {
            return Err(PredictorError::NonFiniteInput);
        }

        let probabilities = self.softmax(&features.scaled());
        if probabilities.iter().any(|value| !value.is_finite()) {
            return Err(PredictorError::NonFiniteOutput);
        }
        Ok(probabilities)
    }

    fn softmax(&self, input: &[f64; INPUT_WIDTH]) -> [f64; CLASS_COUNT] {
        let mut logits = [0.0; CLASS_COUNT];
        for (logit, row) in logits.iter_mut().zip(&self.weights) {
            *logit = row.iter().zip(input).map(|(w, x)| w * x).sum();
        }

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for logit in &mut logits {
            *logit = (*logit - max).exp();
            total += *logit;
        }
        for logit in &mut logits {
            *logit /= total;
        }
        logits
    }

    fn sgd_step(
        &mut self,
        input: &[f64; INPUT_WIDTH],
        label: PredictionClass,
        learning_rate: f64,
    ) {
        let probabilities = self.softmax(input);
        for (class_index, row) in self.weights.iter_mut().enumerate() {
            let target = if class_index == label.index() { 1.0 } else { 0.0 };
            let gradient = probabilities[class_index] - target;
            for (weight, x) in row.iter_mut().zip(input) {
                *weight -= learning_rate * gradient * x;
            }
        }
    }
}

impl Predictor for SoftmaxPredictor {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let probabilities = self.class_probabilities(features)?;
        let (best, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::MIN), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            });
        let class = PredictionClass::from_index(best).ok_or(PredictorError::NonFiniteOutput)?;

        Ok(Prediction {
            class,
            confidence: (probability * 100.0).clamp(0.0, 100.0),
            explanation: explain(class),
        })
    }

    fn retrain(
        &mut self,
        features: &FeatureVector,
        label: PredictionClass,
    ) -> Result<(), PredictorError> {
        if !features.is_finite() {
            return Err(PredictorError::NonFiniteInput);
        }

        let previous = self.weights;
        self.sgd_step(&features.scaled(), label, RETRAIN_LEARNING_RATE);
        if self.weights.iter().flatten().any(|weight| !weight.is_finite()) {
            self.weights = previous;
            return Err(PredictorError::NonFiniteOutput);
        }
        Ok(())
    }

    fn export_state(&self) -> Result<String, PredictorError> {
        let state = ModelState {
            version: MODEL_STATE_VERSION,
            weights: self.weights.iter().map(|row| row.to_vec()).collect(),
        };
        serde_json::to_string(&state).map_err(|err| PredictorError::InvalidState(err.to_string()))
    }
}

fn explain(class: PredictionClass) -> String {
    match class {
        PredictionClass::Normal => "Operating pattern matches normal behaviour.",
        PredictionClass::HighConsumption => {
            "Load pattern resembles past high-consumption periods."
        }
        PredictionClass::BatteryDrain => "Battery state and load resemble past drain events.",
        PredictionClass::ReducedSolar => "Solar output is tracking below its usual level.",
        PredictionClass::Optimal => "Conditions favour charging the battery from solar.",
    }
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCacheEntry {
    pub class: PredictionClass,
    pub confidence: f64,
    pub explanation: String,
}

impl From<&Prediction> for PredictionCacheEntry {
    fn from(prediction: &Prediction) -> Self {
        Self {
            class: prediction.class,
            confidence: prediction.confidence,
            explanation: prediction.explanation.clone(),
        }
    }
}

impl From<&PredictionCacheEntry> for Prediction {
    fn from(entry: &PredictionCacheEntry) -> Self {
        Self {
            class: entry.class,
            confidence: entry.confidence,
            explanation: entry.explanation.clone(),
        }
    }
}

pub const PREDICTION_CACHE_CAPACITY: usize = 1000;

/// Exact-signature memo of earlier predictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionCache {
    entries: BTreeMap<String, PredictionCacheEntry>,
}

impl PredictionCache {
    pub fn get(&self, signature: &str) -> Option<&PredictionCacheEntry> {
        self.entries.get(signature)
    }

    /// Replaces any entry for `signature`. At capacity the lexicographically
    /// smallest other signature is evicted.
    pub fn insert(&mut self, signature: String, entry: PredictionCacheEntry) {
        if !self.entries.contains_key(&signature)
            && self.entries.len() >= PREDICTION_CACHE_CAPACITY
        {
            self.entries.pop_first();
        }
        self.entries.insert(signature, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-class surfacing rule: `(class, threshold, id, type, priority, title)`.
const SURFACED_CLASSES: [(
    PredictionClass,
    f64,
    &str,
    InsightType,
    Priority,
    &str,
); 4] = [
    (
        PredictionClass::BatteryDrain,
        75.0,
        "ml-battery-drain",
        InsightType::Prediction,
        Priority::High,
        "Battery Drain Predicted",
    ),
    (
        PredictionClass::HighConsumption,
        65.0,
        "ml-high-consumption",
        InsightType::Prediction,
        Priority::Medium,
        "High Consumption Predicted",
    ),
    (
        PredictionClass::ReducedSolar,
        70.0,
        "ml-reduced-solar",
        InsightType::Optimization,
        Priority::Medium,
        "Reduced Solar Output Predicted",
    ),
    (
        PredictionClass::Optimal,
        80.0,
        "ml-optimal-charging",
        InsightType::Tip,
        Priority::Low,
        "Optimal Charging Window",
    ),
];

/// Turns a prediction into an insight when it clears its class threshold.
pub fn predictor_insight(prediction: &Prediction, generated_at: TimestampMs) -> Option<Insight> {
    let (_, _, id, kind, priority, title) = SURFACED_CLASSES
        .iter()
        .find(|(class, threshold, ..)| {
            *class == prediction.class && prediction.confidence > *threshold
        })?;

    Some(
        Insight::new(
            id,
            *kind,
            *priority,
            prediction.confidence.round() as u8,
            title,
            format!(
                "{} ({:.0}% confidence)",
                prediction.explanation, prediction.confidence
            ),
            generated_at,
        )
        .with_predictor_source(),
    )
}

pub fn is_predictor_insight_id(id: &str) -> bool {
    SURFACED_CLASSES.iter().any(|(_, _, known, ..)| *known == id)
}
