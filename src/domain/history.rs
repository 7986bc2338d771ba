use std::collections::VecDeque;

use serde::Serialize;

use crate::domain::clock::TimestampMs;
use crate::domain::metrics::DerivedMetrics;

pub const MIN_HISTORY_CAPACITY: usize = 24;
pub const MAX_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerPoint {
    pub timestamp: TimestampMs,
    pub solar_power: f64,
    pub grid_power: f64,
    pub battery_level: f64,
    pub consumption: f64,
    pub charging_power: f64,
}

impl PowerPoint {
    pub fn from_metrics(timestamp: TimestampMs, metrics: &DerivedMetrics) -> Self {
        Self {
            timestamp,
            solar_power: metrics.solar_power,
            grid_power: metrics.grid_power,
            battery_level: metrics.battery_level,
            consumption: metrics.load_power,
            charging_power: metrics.charging_power(),
        }
    }

    pub fn value(&self, field: HistoryField) -> f64 {
        match field {
            HistoryField::SolarPower => self.solar_power,
            HistoryField::GridPower => self.grid_power,
            HistoryField::BatteryLevel => self.battery_level,
            HistoryField::Consumption => self.consumption,
            HistoryField::ChargingPower => self.charging_power,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryField {
    SolarPower,
    GridPower,
    BatteryLevel,
    Consumption,
    ChargingPower,
}

/// Fixed-capacity, arrival-ordered sample history. The oldest point is
/// dropped when a push would exceed the capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    capacity: usize,
    points: VecDeque<PowerPoint>,
}

impl HistoryBuffer {
    /// `capacity` is clamped into the supported 24..=50 range.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: PowerPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<&PowerPoint> {
        self.points.back()
    }

    /// The last `count` points, oldest first.
    pub fn recent(
        &self,
        count: usize,
    ) -> impl DoubleEndedIterator<Item = &PowerPoint> + ExactSizeIterator {
        let start = self.points.len().saturating_sub(count);
        self.points.range(start..)
    }

    /// `latest - earliest` of `field` over the last `window` points.
    pub fn delta(&self, field: HistoryField, window: usize) -> Option<f64> {
        let mut points = self.recent(window.max(1));
        let first = points.next()?;
        let last = points.next_back().unwrap_or(first);
        Some(last.value(field) - first.value(field))
    }

    pub fn mean(&self, field: HistoryField) -> Option<f64> {
        self.mean_where(field, |_| true)
    }

    pub fn mean_where<P>(&self, field: HistoryField, predicate: P) -> Option<f64>
    where
        P: Fn(&PowerPoint) -> bool,
    {
        let (sum, count) = self
            .points
            .iter()
            .filter(|point| predicate(point))
            .fold((0.0, 0_usize), |(sum, count), point| {
                (sum + point.value(field), count + 1)
            });

        (count > 0).then(|| sum / count as f64)
    }
}
