use crate::domain::predictor::{
    FeatureVector, Prediction, PredictionCache, PredictionCacheEntry, PredictionClass, Predictor,
};

pub const DEFAULT_RETRAIN_CONFIDENCE: f64 = 70.0;
/// Corrective steps applied when the user dismisses a predictor insight.
pub const FEEDBACK_STEPS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub prediction: Prediction,
    pub cache_changed: bool,
    pub model_changed: bool,
}

impl PredictionOutcome {
    fn unchanged(prediction: Prediction) -> Self {
        Self {
            prediction,
            cache_changed: false,
            model_changed: false,
        }
    }
}

/// Owns the predictor and its signature cache. A missing predictor means the
/// persisted model could not be loaded; every evaluation then falls back.
pub struct PredictionEngine {
    predictor: Option<Box<dyn Predictor>>,
    cache: PredictionCache,
    retrain_confidence: f64,
}

impl PredictionEngine {
    pub fn new(
        predictor: Option<Box<dyn Predictor>>,
        cache: PredictionCache,
        retrain_confidence: f64,
    ) -> Self {
        Self {
            predictor,
            cache,
            retrain_confidence,
        }
    }

    pub fn is_available(&self) -> bool {
        self.predictor.is_some()
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    pub fn export_model(&self) -> Option<String> {
        let predictor = self.predictor.as_ref()?;
        match predictor.export_state() {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(error = %err, "failed to export predictor state");
                None
            }
        }
    }

    pub fn evaluate(&mut self, features: &FeatureVector) -> PredictionOutcome {
        let Some(predictor) = self.predictor.as_mut() else {
            return PredictionOutcome::unchanged(Prediction::fallback());
        };

        let signature = features.signature();
        if let Some(entry) = self.cache.get(&signature) {
            return PredictionOutcome::unchanged(entry.into());
        }

        let prediction = match predictor.predict(features) {
            Ok(prediction) => prediction,
            Err(err) => {
                tracing::warn!(error = %err, %signature, "prediction failed, using fallback");
                return PredictionOutcome::unchanged(Prediction::fallback());
            }
        };

        let mut model_changed = false;
        if prediction.confidence < self.retrain_confidence {
            match predictor.retrain(features, prediction.class) {
                Ok(()) => {
                    model_changed = true;
                    tracing::debug!(
                        class = prediction.class.label(),
                        confidence = prediction.confidence,
                        "folded low-confidence sample into model"
                    );
                }
                Err(err) => tracing::warn!(error = %err, "self-labelled retrain failed"),
            }
        }

        self.cache
            .insert(signature, PredictionCacheEntry::from(&prediction));

        PredictionOutcome {
            prediction,
            cache_changed: true,
            model_changed,
        }
    }

    /// Treats `features` as a false positive: retrains towards `normal` and
    /// supersedes the cached prediction for the same signature.
    pub fn apply_feedback(&mut self, features: &FeatureVector) -> PredictionOutcome {
        let Some(predictor) = self.predictor.as_mut() else {
            return PredictionOutcome::unchanged(Prediction::fallback());
        };

        let mut model_changed = false;
        for _ in 0..FEEDBACK_STEPS {
            if let Err(err) = predictor.retrain(features, PredictionClass::Normal) {
                tracing::warn!(error = %err, "corrective retrain failed");
                break;
            }
            model_changed = true;
        }

        let signature = features.signature();
        match predictor.predict(features) {
            Ok(prediction) => {
                self.cache
                    .insert(signature, PredictionCacheEntry::from(&prediction));
                PredictionOutcome {
                    prediction,
                    cache_changed: true,
                    model_changed,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, %signature, "prediction after feedback failed");
                PredictionOutcome {
                    prediction: Prediction::fallback(),
                    cache_changed: false,
                    model_changed,
                }
            }
        }
    }
}
