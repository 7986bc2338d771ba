use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::insight::{Insight, InsightType, Priority};

pub const DEFAULT_MIN_HISTORY_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightProfile {
    #[default]
    Simple,
    Extended,
}

impl InsightProfile {
    pub fn max_insights(self) -> usize {
        match self {
            Self::Simple => 4,
            Self::Extended => 6,
        }
    }
}

/// Dismissed ids plus priority/type allow-sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub dismissed: BTreeSet<String>,
    pub priorities: BTreeSet<Priority>,
    pub types: BTreeSet<InsightType>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            dismissed: BTreeSet::new(),
            priorities: Priority::ALL.into_iter().collect(),
            types: InsightType::ALL.into_iter().collect(),
        }
    }
}

impl UserPreferences {
    /// Returns `false` when the id was already dismissed.
    pub fn dismiss(&mut self, id: &str) -> bool {
        self.dismissed.insert(id.to_string())
    }

    /// An empty set means "no filter" and is stored as the full set.
    pub fn set_filters(&mut self, priorities: BTreeSet<Priority>, types: BTreeSet<InsightType>) {
        self.priorities = if priorities.is_empty() {
            Priority::ALL.into_iter().collect()
        } else {
            priorities
        };
        self.types = if types.is_empty() {
            InsightType::ALL.into_iter().collect()
        } else {
            types
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Normalizes sets that were persisted empty.
    pub fn normalized(mut self) -> Self {
        let priorities = std::mem::take(&mut self.priorities);
        let types = std::mem::take(&mut self.types);
        self.set_filters(priorities, types);
        self
    }

    pub fn allows(&self, insight: &Insight) -> bool {
        !self.dismissed.contains(&insight.id)
            && self.priorities.contains(&insight.priority)
            && self.types.contains(&insight.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsightAggregator {
    max_insights: usize,
    min_history_depth: usize,
}

impl InsightAggregator {
    pub fn new(profile: InsightProfile, min_history_depth: usize) -> Self {
        Self {
            max_insights: profile.max_insights(),
            min_history_depth,
        }
    }

    pub fn is_ready(&self, history_depth: usize, has_metrics: bool, has_weather: bool) -> bool {
        has_metrics && has_weather && history_depth >= self.min_history_depth
    }

    /// Filter, rank, dedupe and truncate one cycle's candidates.
    ///
    /// Ranking is priority first, then confidence descending. The sort is
    /// stable, so equal candidates keep their generation order and the first
    /// occurrence of an id wins.
    pub fn aggregate(&self, candidates: Vec<Insight>, preferences: &UserPreferences) -> Vec<Insight> {
        let mut ranked: Vec<Insight> = candidates
            .into_iter()
            .filter(|insight| preferences.allows(insight))
            .collect();
        ranked.sort_by_key(|insight| (insight.priority, Reverse(insight.confidence)));

        let mut seen = HashSet::new();
        ranked.retain(|insight| seen.insert(insight.id.clone()));
        ranked.truncate(self.max_insights);
        ranked
    }
}
