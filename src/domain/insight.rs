use serde::{Deserialize, Serialize};

use crate::domain::clock::TimestampMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Optimization,
    Prediction,
    Alert,
    Tip,
    Weather,
}

impl InsightType {
    pub const ALL: [InsightType; 5] = [
        InsightType::Optimization,
        InsightType::Prediction,
        InsightType::Alert,
        InsightType::Tip,
        InsightType::Weather,
    ];
}

/// Declaration order is display order: high sorts before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Rule,
    Predictor,
}

/// A single observation shown to the user.
///
/// `id` names the cause, not the occurrence: the same condition produces the
/// same id every cycle so dismissals and deduplication match exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub title: String,
    pub description: String,
    pub confidence: u8,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub generated_at: TimestampMs,
    pub source: InsightSource,
}

impl Insight {
    pub fn new(
        id: &str,
        kind: InsightType,
        priority: Priority,
        confidence: u8,
        title: &str,
        description: impl Into<String>,
        generated_at: TimestampMs,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            description: description.into(),
            confidence: confidence.min(100),
            priority,
            icon: None,
            generated_at,
            source: InsightSource::Rule,
        }
    }

    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.to_string());
        self
    }

    pub fn with_predictor_source(mut self) -> Self {
        self.source = InsightSource::Predictor;
        self
    }
}
