use crate::domain::clock::TimestampMs;
use crate::domain::history::{HistoryBuffer, HistoryField};
use crate::domain::insight::{Insight, InsightType, Priority};
use crate::domain::metrics::DerivedMetrics;
use crate::domain::telemetry::ActiveSource;
use crate::domain::weather::WeatherSnapshot;

const DRAIN_WINDOW: usize = 10;
const DRAIN_THRESHOLD_PCT: f64 = -20.0;
const BATTERY_HOT_C: f64 = 35.0;
const SOLAR_HOURS: (u32, u32) = (6, 18);
const SOLAR_UNDERPERFORMING_W: f64 = 1000.0;
const CONSUMPTION_SPIKE_FACTOR: f64 = 1.3;
const PEAK_HOURS: (u32, u32) = (18, 22);
const CHARGED_BATTERY_PCT: f64 = 80.0;
const HEAT_ALERT_C: f64 = 35.0;
const COLD_ALERT_C: f64 = 5.0;
const COOLING_DEMAND_C: f64 = 30.0;
const HEATING_DEMAND_C: f64 = 10.0;
const DEMAND_TREND_WINDOW: usize = 6;

/// Everything a rule may look at for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub metrics: &'a DerivedMetrics,
    pub history: &'a HistoryBuffer,
    pub weather: Option<&'a WeatherSnapshot>,
    pub local_hour: u32,
    pub now: TimestampMs,
}

pub type RuleFn = fn(&RuleContext<'_>) -> Option<Insight>;

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub evaluate: RuleFn,
}

/// Ordered set of independent evaluators. Registration order only affects the
/// order of the returned candidates, never which candidates are produced.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(vec![
            Rule { name: "battery-drain", evaluate: battery_drain },
            Rule { name: "battery-temp", evaluate: battery_temperature },
            Rule { name: "solar-low", evaluate: solar_underperformance },
            Rule { name: "high-consumption", evaluate: consumption_spike },
            Rule { name: "grid-optimization", evaluate: grid_charging_opportunity },
            Rule { name: "peak-hours", evaluate: peak_hour_tip },
            Rule { name: "weather-cloudy", evaluate: weather_cloudy },
            Rule { name: "weather-rain", evaluate: weather_rain },
            Rule { name: "weather-heat", evaluate: weather_heat },
            Rule { name: "weather-cold", evaluate: weather_cold },
            Rule { name: "weather-storm", evaluate: weather_storm },
            Rule { name: "weather-cooling-demand", evaluate: cooling_demand },
            Rule { name: "weather-heating-demand", evaluate: heating_demand },
        ])
    }
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }

    pub fn evaluate(&self, context: &RuleContext<'_>) -> Vec<Insight> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let insight = (rule.evaluate)(context);
                if insight.is_some() {
                    tracing::trace!(rule = rule.name, "rule fired");
                }
                insight
            })
            .collect()
    }
}

fn in_hours(hour: u32, (start, end): (u32, u32)) -> bool {
    (start..=end).contains(&hour)
}

fn consumption_rising(history: &HistoryBuffer) -> bool {
    history
        .delta(HistoryField::Consumption, DEMAND_TREND_WINDOW)
        .is_some_and(|delta| delta > 0.0)
}

pub fn battery_drain(context: &RuleContext<'_>) -> Option<Insight> {
    if context.metrics.sensor_error {
        return None;
    }

    let trend = context
        .history
        .delta(HistoryField::BatteryLevel, DRAIN_WINDOW)?;
    if trend >= DRAIN_THRESHOLD_PCT {
        return None;
    }

    Some(Insight::new(
        "battery-drain",
        InsightType::Alert,
        Priority::High,
        85,
        "High Battery Drain Detected",
        format!(
            "Battery level dropped {:.1}% in recent cycles. Consider reducing load or switching to grid power.",
            trend.abs()
        ),
        context.now,
    ))
}

pub fn battery_temperature(context: &RuleContext<'_>) -> Option<Insight> {
    let temperature = context.metrics.battery_temperature_c;
    if temperature <= BATTERY_HOT_C {
        return None;
    }

    Some(Insight::new(
        "battery-temp",
        InsightType::Alert,
        Priority::High,
        95,
        "Battery Temperature Warning",
        format!(
            "Battery temperature is {temperature:.1}°C. High temperatures can reduce battery lifespan."
        ),
        context.now,
    ))
}

pub fn solar_underperformance(context: &RuleContext<'_>) -> Option<Insight> {
    if !in_hours(context.local_hour, SOLAR_HOURS) {
        return None;
    }

    let average = context
        .history
        .mean_where(HistoryField::SolarPower, |point| point.solar_power > 0.0)?;
    if average >= SOLAR_UNDERPERFORMING_W {
        return None;
    }

    Some(Insight::new(
        "solar-low",
        InsightType::Optimization,
        Priority::Medium,
        75,
        "Solar Panel Optimization Needed",
        format!(
            "Solar panels are averaging {average:.0} W during daylight hours. Check for obstructions or cleaning requirements."
        ),
        context.now,
    ))
}

pub fn consumption_spike(context: &RuleContext<'_>) -> Option<Insight> {
    let average = context.history.mean(HistoryField::Consumption)?;
    let current = context.history.latest()?.consumption;
    if average <= 0.0 || current <= average * CONSUMPTION_SPIKE_FACTOR {
        return None;
    }

    let above_average = (current / average - 1.0) * 100.0;
    Some(Insight::new(
        "high-consumption",
        InsightType::Prediction,
        Priority::Medium,
        90,
        "Increased Power Demand Detected",
        format!(
            "Current load is {above_average:.0}% above average. System may switch to backup power soon."
        ),
        context.now,
    ))
}

pub fn grid_charging_opportunity(context: &RuleContext<'_>) -> Option<Insight> {
    let metrics = context.metrics;
    if metrics.sensor_error
        || metrics.active_source != ActiveSource::Grid
        || metrics.battery_level <= CHARGED_BATTERY_PCT
    {
        return None;
    }

    Some(Insight::new(
        "grid-optimization",
        InsightType::Tip,
        Priority::Low,
        70,
        "Battery Charging Opportunity",
        "Grid power is stable and the battery is well charged. Consider reducing grid dependency during peak solar hours.",
        context.now,
    ))
}

pub fn peak_hour_tip(context: &RuleContext<'_>) -> Option<Insight> {
    if !in_hours(context.local_hour, PEAK_HOURS)
        || context.metrics.active_source != ActiveSource::Grid
    {
        return None;
    }

    Some(Insight::new(
        "peak-hours",
        InsightType::Tip,
        Priority::Low,
        80,
        "Peak Hour Energy Management",
        "Consider switching to battery power during peak demand hours to reduce electricity costs.",
        context.now,
    ))
}

pub fn weather_cloudy(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context.weather.filter(|weather| weather.is_cloudy())?;

    Some(
        Insight::new(
            "weather-cloudy",
            InsightType::Weather,
            Priority::Medium,
            80,
            "Reduced Solar Output Expected",
            format!(
                "{} conditions will limit solar generation. Conserve battery charge where possible.",
                weather.description
            ),
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn weather_rain(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context.weather.filter(|weather| weather.is_rainy())?;

    Some(
        Insight::new(
            "weather-rain",
            InsightType::Tip,
            Priority::Low,
            70,
            "Panel Maintenance Window",
            "Rain will rinse dust off the panels. Schedule an inspection once it clears.",
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn weather_heat(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context
        .weather
        .filter(|weather| weather.temperature_c > HEAT_ALERT_C)?;

    Some(
        Insight::new(
            "weather-heat",
            InsightType::Alert,
            Priority::High,
            85,
            "Extreme Heat Alert",
            format!(
                "Ambient temperature is {:.1}°C. Keep the battery enclosure ventilated to avoid overheating.",
                weather.temperature_c
            ),
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn weather_cold(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context
        .weather
        .filter(|weather| weather.temperature_c < COLD_ALERT_C)?;

    Some(
        Insight::new(
            "weather-cold",
            InsightType::Alert,
            Priority::Medium,
            80,
            "Cold Weather Alert",
            format!(
                "Ambient temperature is {:.1}°C. Battery capacity is reduced in the cold; avoid deep discharge.",
                weather.temperature_c
            ),
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn weather_storm(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context.weather.filter(|weather| weather.is_thunderstorm())?;

    Some(
        Insight::new(
            "weather-storm",
            InsightType::Weather,
            Priority::High,
            95,
            "Storm Warning",
            "Thunderstorm activity detected. Charge the battery now and protect equipment from surges.",
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn cooling_demand(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context
        .weather
        .filter(|weather| weather.temperature_c > COOLING_DEMAND_C)?;
    if !consumption_rising(context.history) {
        return None;
    }

    Some(
        Insight::new(
            "weather-cooling-demand",
            InsightType::Prediction,
            Priority::Medium,
            75,
            "Cooling Demand Rising",
            format!(
                "Load is climbing with ambient temperature at {:.1}°C. Expect higher consumption from cooling.",
                weather.temperature_c
            ),
            context.now,
        )
        .with_icon(&weather.icon),
    )
}

pub fn heating_demand(context: &RuleContext<'_>) -> Option<Insight> {
    let weather = context
        .weather
        .filter(|weather| weather.temperature_c < HEATING_DEMAND_C)?;
    if !consumption_rising(context.history) {
        return None;
    }

    Some(
        Insight::new(
            "weather-heating-demand",
            InsightType::Prediction,
            Priority::Medium,
            75,
            "Heating Demand Rising",
            format!(
                "Load is climbing with ambient temperature at {:.1}°C. Expect higher consumption from heating.",
                weather.temperature_c
            ),
            context.now,
        )
        .with_icon(&weather.icon),
    )
}
