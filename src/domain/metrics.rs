use serde::Serialize;
use thiserror::Error;

use crate::domain::telemetry::{ActiveSource, RawReading};

/// Loads at or below this many watts are treated as "no load" for efficiency.
pub const LOAD_EPSILON_W: f64 = 0.01;

/// Battery chemistry thresholds used by metrics derivation.
///
/// The default describes a 12 V pack cut off at 10.8 V and full at 14.4 V.
/// Older dashboard revisions mapped the level from 9.0 V instead; that variant
/// is only reachable by configuring `vmin` explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryProfile {
    pub vmin: f64,
    pub vmax: f64,
    pub critical_level: f64,
    pub danger_temperature_c: f64,
    pub healthy_temperature_limit_c: f64,
    pub plausible_min_voltage: f64,
    pub plausible_max_voltage: f64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ProfileError {
    #[error("battery vmax ({vmax}) must be greater than vmin ({vmin})")]
    InvertedVoltageRange { vmin: f64, vmax: f64 },
    #[error("plausible sensor range ({min}..{max}) is empty")]
    EmptyPlausibleRange { min: f64, max: f64 },
    #[error("critical battery level {0} must be within 0..=100")]
    CriticalLevelOutOfRange(f64),
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self {
            vmin: 10.8,
            vmax: 14.4,
            critical_level: 15.0,
            danger_temperature_c: 45.0,
            healthy_temperature_limit_c: 50.0,
            plausible_min_voltage: 0.0,
            plausible_max_voltage: 20.0,
        }
    }
}

impl BatteryProfile {
    pub fn validate(self) -> Result<Self, ProfileError> {
        if !(self.vmax > self.vmin) {
            return Err(ProfileError::InvertedVoltageRange {
                vmin: self.vmin,
                vmax: self.vmax,
            });
        }
        if !(self.plausible_max_voltage > self.plausible_min_voltage) {
            return Err(ProfileError::EmptyPlausibleRange {
                min: self.plausible_min_voltage,
                max: self.plausible_max_voltage,
            });
        }
        if !(0.0..=100.0).contains(&self.critical_level) {
            return Err(ProfileError::CriticalLevelOutOfRange(self.critical_level));
        }

        Ok(self)
    }

    pub fn battery_level(&self, voltage: f64) -> f64 {
        let level = (voltage - self.vmin) / (self.vmax - self.vmin) * 100.0;
        if level.is_nan() {
            return 0.0;
        }
        level.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub solar_power: f64,
    pub grid_power: f64,
    pub battery_power: f64,
    pub load_power: f64,
    pub battery_level: f64,
    pub efficiency: f64,
    pub level_change: f64,
    pub battery_voltage: f64,
    pub battery_temperature_c: f64,
    pub active_source: ActiveSource,
    pub is_charging: bool,
    pub battery_critical: bool,
    pub battery_danger: bool,
    pub system_healthy: bool,
    pub sensor_error: bool,
}

impl DerivedMetrics {
    /// Power flowing into the battery, zero while discharging.
    pub fn charging_power(&self) -> f64 {
        if self.is_charging {
            self.battery_power.abs()
        } else {
            0.0
        }
    }
}

pub fn derive_metrics(
    reading: &RawReading,
    previous: Option<&DerivedMetrics>,
    profile: &BatteryProfile,
) -> DerivedMetrics {
    let solar_power = reading.solar_voltage * reading.solar_current;
    let grid_power = reading.grid_voltage * reading.grid_current;
    let battery_power = reading.battery_voltage * reading.battery_current;
    let is_charging = reading.battery_current < 0.0;

    let discharge = if is_charging { 0.0 } else { battery_power.abs() };
    let load_power = match reading.active_source {
        ActiveSource::Solar => solar_power + discharge,
        ActiveSource::Grid => grid_power + discharge,
    };

    let voltage = reading.battery_voltage;
    let temperature = reading.battery_temperature_c;
    let battery_level = profile.battery_level(voltage);
    let efficiency = efficiency(solar_power, load_power);

    let sensor_error =
        !(voltage > profile.plausible_min_voltage && voltage < profile.plausible_max_voltage);

    let level_change = match previous {
        Some(previous) if !previous.sensor_error && !sensor_error => {
            battery_level - previous.battery_level
        }
        _ => 0.0,
    };

    DerivedMetrics {
        solar_power,
        grid_power,
        battery_power,
        load_power,
        battery_level,
        efficiency,
        level_change,
        battery_voltage: voltage,
        battery_temperature_c: temperature,
        active_source: reading.active_source,
        is_charging,
        battery_critical: battery_level < profile.critical_level || voltage <= profile.vmin,
        battery_danger: temperature > profile.danger_temperature_c || voltage > profile.vmax,
        system_healthy: voltage > profile.vmin
            && temperature < profile.healthy_temperature_limit_c,
        sensor_error,
    }
}

fn efficiency(solar_power: f64, load_power: f64) -> f64 {
    if !(load_power > LOAD_EPSILON_W) {
        return 0.0;
    }

    let ratio = solar_power / load_power * 100.0;
    if ratio.is_nan() {
        return 0.0;
    }
    ratio.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use crate::domain::telemetry::{ActiveSource, RawReading};

    use super::{BatteryProfile, ProfileError, derive_metrics};

    fn reading() -> RawReading {
        RawReading {
            solar_voltage: 18.0,
            grid_voltage: 230.0,
            battery_voltage: 12.6,
            solar_current: 50.0,
            grid_current: 2.0,
            battery_current: 10.0,
            battery_temperature_c: 30.0,
            active_source: ActiveSource::Solar,
        }
    }

    #[test]
    fn computes_powers_and_solar_load() {
        let metrics = derive_metrics(&reading(), None, &BatteryProfile::default());

        assert!((metrics.solar_power - 900.0).abs() < 1e-9);
        assert!((metrics.grid_power - 460.0).abs() < 1e-9);
        assert!((metrics.battery_power - 126.0).abs() < 1e-9);
        assert!((metrics.load_power - 1026.0).abs() < 1e-9);
        assert!(!metrics.is_charging);
        assert!((metrics.battery_level - 50.0).abs() < 1e-9);
        assert!((metrics.efficiency - 900.0 / 1026.0 * 100.0).abs() < 1e-9);
        assert!(metrics.system_healthy);
        assert!(!metrics.battery_critical);
        assert!(!metrics.battery_danger);
        assert!(!metrics.sensor_error);
    }

    #[test]
    fn charging_battery_does_not_add_to_load() {
        let mut input = reading();
        input.battery_current = -5.0;
        input.active_source = ActiveSource::Grid;

        let metrics = derive_metrics(&input, None, &BatteryProfile::default());

        assert!(metrics.is_charging);
        assert!((metrics.load_power - 460.0).abs() < 1e-9);
        assert!((metrics.charging_power() - 63.0).abs() < 1e-9);
    }

    #[test]
    fn efficiency_is_zero_without_load() {
        let input = RawReading {
            solar_voltage: 18.0,
            solar_current: 0.0,
            battery_voltage: 12.0,
            ..RawReading::default()
        };

        let metrics = derive_metrics(&input, None, &BatteryProfile::default());

        assert_eq!(metrics.load_power, 0.0);
        assert_eq!(metrics.efficiency, 0.0);
    }

    #[test]
    fn level_and_efficiency_stay_clamped() {
        let profile = BatteryProfile::default();
        let voltages = [-5.0, 0.0, 9.0, 10.8, 12.0, 14.4, 16.0, 19.9, 250.0];
        let currents = [-40.0, -1.0, 0.0, 0.5, 12.0, 80.0];

        for voltage in voltages {
            for current in currents {
                let input = RawReading {
                    solar_voltage: voltage * 1.5,
                    solar_current: current,
                    battery_voltage: voltage,
                    battery_current: -current,
                    ..RawReading::default()
                };
                let metrics = derive_metrics(&input, None, &profile);

                assert!((0.0..=100.0).contains(&metrics.battery_level));
                assert!((0.0..=100.0).contains(&metrics.efficiency));
            }
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let profile = BatteryProfile::default();
        let first = derive_metrics(&reading(), None, &profile);
        let second = derive_metrics(&reading(), None, &profile);

        assert_eq!(first, second);
        assert_eq!(first.efficiency.to_bits(), second.efficiency.to_bits());
        assert_eq!(first.battery_level.to_bits(), second.battery_level.to_bits());
    }

    #[test]
    fn flags_critical_and_danger_states() {
        let profile = BatteryProfile::default();
        let mut input = reading();
        input.battery_voltage = 10.8;
        input.battery_temperature_c = 47.0;

        let metrics = derive_metrics(&input, None, &profile);

        assert!(metrics.battery_critical);
        assert!(metrics.battery_danger);
        assert!(!metrics.system_healthy);

        input.battery_voltage = 14.9;
        input.battery_temperature_c = 25.0;
        let overvolt = derive_metrics(&input, None, &profile);
        assert!(overvolt.battery_danger);
        assert_eq!(overvolt.battery_level, 100.0);
    }

    #[test]
    fn flags_implausible_voltage_as_sensor_error() {
        let profile = BatteryProfile::default();

        let missing = derive_metrics(&RawReading::default(), None, &profile);
        assert!(missing.sensor_error);
        assert_eq!(missing.battery_level, 0.0);

        let mut input = reading();
        input.battery_voltage = 24.0;
        assert!(derive_metrics(&input, None, &profile).sensor_error);
    }

    #[test]
    fn tracks_level_change_against_previous_tick() {
        let profile = BatteryProfile::default();
        let previous = derive_metrics(&reading(), None, &profile);
        let mut input = reading();
        input.battery_voltage = 12.24;

        let current = derive_metrics(&input, Some(&previous), &profile);
        assert!((current.level_change + 10.0).abs() < 1e-9);

        let broken = derive_metrics(&RawReading::default(), Some(&previous), &profile);
        assert_eq!(broken.level_change, 0.0);
    }

    #[test]
    fn honours_configured_vmin() {
        let legacy = BatteryProfile {
            vmin: 9.0,
            ..BatteryProfile::default()
        };
        let mut input = reading();
        input.battery_voltage = 11.7;

        let metrics = derive_metrics(&input, None, &legacy);
        assert!((metrics.battery_level - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_inverted_profiles() {
        let profile = BatteryProfile {
            vmin: 14.0,
            vmax: 12.0,
            ..BatteryProfile::default()
        };

        assert_eq!(
            profile.validate(),
            Err(ProfileError::InvertedVoltageRange {
                vmin: 14.0,
                vmax: 12.0,
            })
        );
        assert!(BatteryProfile::default().validate().is_ok());
    }
}
