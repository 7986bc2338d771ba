use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_BATTERY_TEMPERATURE_C: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSource {
    #[default]
    Solar,
    Grid,
}

/// One telemetry tick with every channel populated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub solar_voltage: f64,
    pub grid_voltage: f64,
    pub battery_voltage: f64,
    pub solar_current: f64,
    pub grid_current: f64,
    pub battery_current: f64,
    pub battery_temperature_c: f64,
    pub active_source: ActiveSource,
}

impl Default for RawReading {
    fn default() -> Self {
        Self {
            solar_voltage: 0.0,
            grid_voltage: 0.0,
            battery_voltage: 0.0,
            solar_current: 0.0,
            grid_current: 0.0,
            battery_current: 0.0,
            battery_temperature_c: DEFAULT_BATTERY_TEMPERATURE_C,
            active_source: ActiveSource::Solar,
        }
    }
}

const SOLAR_VOLTAGE_KEYS: &[&str] = &["solar_voltage", "solarVoltage", "pv_voltage", "vpv"];
const GRID_VOLTAGE_KEYS: &[&str] = &["grid_voltage", "gridVoltage", "mains_voltage", "vgrid"];
const BATTERY_VOLTAGE_KEYS: &[&str] = &["battery_voltage", "batteryVoltage", "batt_v", "vbat"];
const SOLAR_CURRENT_KEYS: &[&str] = &["solar_current", "solarCurrent", "pv_current", "ipv"];
const GRID_CURRENT_KEYS: &[&str] = &["grid_current", "gridCurrent", "mains_current", "igrid"];
const BATTERY_CURRENT_KEYS: &[&str] = &["battery_current", "batteryCurrent", "batt_i", "ibat"];
const BATTERY_TEMPERATURE_KEYS: &[&str] = &[
    "battery_temperature",
    "batteryTemperature",
    "battery_temp",
    "temperature",
];
const ACTIVE_SOURCE_KEYS: &[&str] = &["active_source", "activeSource", "source", "mode"];

const GRID_SOURCE_NAMES: &[&str] = &["grid", "mains", "nepa", "utility"];

/// Builds a [`RawReading`] from a loosely structured sample.
///
/// Missing and unparsable channels fall back to their defaults; this never
/// fails, and a payload that is not a JSON object yields an all-default reading.
pub fn normalize_sample(payload: &Value) -> RawReading {
    let Some(object) = payload.as_object() else {
        return RawReading::default();
    };

    RawReading {
        solar_voltage: find_number(object, SOLAR_VOLTAGE_KEYS).unwrap_or(0.0),
        grid_voltage: find_number(object, GRID_VOLTAGE_KEYS).unwrap_or(0.0),
        battery_voltage: find_number(object, BATTERY_VOLTAGE_KEYS).unwrap_or(0.0),
        solar_current: find_number(object, SOLAR_CURRENT_KEYS).unwrap_or(0.0),
        grid_current: find_number(object, GRID_CURRENT_KEYS).unwrap_or(0.0),
        battery_current: find_number(object, BATTERY_CURRENT_KEYS).unwrap_or(0.0),
        battery_temperature_c: find_number(object, BATTERY_TEMPERATURE_KEYS)
            .unwrap_or(DEFAULT_BATTERY_TEMPERATURE_C),
        active_source: find_value(object, ACTIVE_SOURCE_KEYS)
            .and_then(parse_active_source)
            .unwrap_or_default(),
    }
}

fn parse_active_source(value: &Value) -> Option<ActiveSource> {
    match value {
        Value::String(text) => {
            let normalized = text.trim().to_ascii_lowercase();
            if normalized == "solar" {
                Some(ActiveSource::Solar)
            } else if GRID_SOURCE_NAMES.contains(&normalized.as_str()) {
                Some(ActiveSource::Grid)
            } else {
                parse_f64_from_text(&normalized).and_then(source_from_code)
            }
        }
        Value::Number(number) => number.as_f64().and_then(source_from_code),
        Value::Bool(true) => Some(ActiveSource::Grid),
        Value::Bool(false) => Some(ActiveSource::Solar),
        _ => None,
    }
}

fn source_from_code(code: f64) -> Option<ActiveSource> {
    if code == 0.0 {
        Some(ActiveSource::Solar)
    } else if code == 1.0 {
        Some(ActiveSource::Grid)
    } else {
        None
    }
}

fn find_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    find_value(object, aliases).and_then(parse_f64)
}

fn find_value<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        if let Some(value) = object.get(*alias) {
            return Some(value);
        }
    }

    let normalized_aliases: Vec<String> =
        aliases.iter().map(|alias| normalize_key(alias)).collect();

    object.iter().find_map(|(key, value)| {
        let normalized_key = normalize_key(key);
        normalized_aliases
            .iter()
            .any(|alias| alias == &normalized_key)
            .then_some(value)
    })
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|char| char.is_ascii_alphanumeric())
        .flat_map(|char| char.to_lowercase())
        .collect()
}

fn parse_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_f64_from_text(text),
        _ => None,
    }?;

    number.is_finite().then_some(number)
}

fn parse_f64_from_text(text: &str) -> Option<f64> {
    let token = leading_numeric_token(text.trim())?;
    token.replace(',', ".").parse::<f64>().ok()
}

// Accepts an optional sign, digits and one decimal separator, followed by an
// optional unit suffix ("12,6 V"). Anything else before the number rejects it,
// and so does an exponent ("1e3"), which would otherwise read as a unit.
fn leading_numeric_token(text: &str) -> Option<&str> {
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_separator = false;

    for (index, char) in text.char_indices() {
        match char {
            '-' | '+' if index == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' | ',' if !seen_separator => seen_separator = true,
            _ => break,
        }
        end = index + char.len_utf8();
    }

    if !seen_digit {
        return None;
    }

    if has_exponent(&text[end..]) {
        return None;
    }

    let rest = text[end..].trim_start();
    if rest
        .chars()
        .next()
        .is_some_and(|char| char.is_ascii_digit() || char == '.' || char == ',')
    {
        return None;
    }

    Some(&text[..end])
}

fn has_exponent(suffix: &str) -> bool {
    let mut chars = suffix.chars();
    if !matches!(chars.next(), Some('e' | 'E')) {
        return false;
    }
    match chars.next() {
        Some('+' | '-') => chars.next().is_some_and(|char| char.is_ascii_digit()),
        Some(char) => char.is_ascii_digit(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ActiveSource, RawReading, normalize_sample};

    #[test]
    fn parses_complete_sample() {
        let payload = json!({
            "solar_voltage": "18.5",
            "grid_voltage": 230,
            "battery_voltage": "12.6",
            "solar_current": "4.2",
            "grid_current": 0,
            "battery_current": "-2.5",
            "battery_temperature": "31.5",
            "active_source": "solar"
        });

        let reading = normalize_sample(&payload);

        assert_eq!(
            reading,
            RawReading {
                solar_voltage: 18.5,
                grid_voltage: 230.0,
                battery_voltage: 12.6,
                solar_current: 4.2,
                grid_current: 0.0,
                battery_current: -2.5,
                battery_temperature_c: 31.5,
                active_source: ActiveSource::Solar,
            }
        );
    }

    #[test]
    fn defaults_missing_channels() {
        let reading = normalize_sample(&json!({"battery_voltage": 12.1}));

        assert_eq!(reading.battery_voltage, 12.1);
        assert_eq!(reading.solar_voltage, 0.0);
        assert_eq!(reading.grid_current, 0.0);
        assert_eq!(reading.battery_temperature_c, 25.0);
        assert_eq!(reading.active_source, ActiveSource::Solar);
    }

    #[test]
    fn treats_malformed_values_as_absent() {
        let reading = normalize_sample(&json!({
            "battery_voltage": "n/a",
            "solar_current": "",
            "battery_temperature": {"value": 40},
            "grid_voltage": "1.2.3",
            "grid_current": "1e3",
            "solar_voltage": "2.5E-1 V",
            "active_source": "wind"
        }));

        assert_eq!(reading, RawReading::default());
    }

    #[test]
    fn accepts_units_and_decimal_commas() {
        let reading = normalize_sample(&json!({
            "battery_voltage": "12,6 V",
            "battery_current": "-3.5A"
        }));

        assert_eq!(reading.battery_voltage, 12.6);
        assert_eq!(reading.battery_current, -3.5);
    }

    #[test]
    fn matches_aliases_case_insensitively() {
        let reading = normalize_sample(&json!({
            "Battery Voltage": 13.1,
            "SOLAR-CURRENT": 2,
            "Mode": "NEPA"
        }));

        assert_eq!(reading.battery_voltage, 13.1);
        assert_eq!(reading.solar_current, 2.0);
        assert_eq!(reading.active_source, ActiveSource::Grid);
    }

    #[test]
    fn maps_numeric_source_flag() {
        assert_eq!(
            normalize_sample(&json!({"source": 1})).active_source,
            ActiveSource::Grid
        );
        assert_eq!(
            normalize_sample(&json!({"source": "0"})).active_source,
            ActiveSource::Solar
        );
        assert_eq!(
            normalize_sample(&json!({"source": 7})).active_source,
            ActiveSource::Solar
        );
    }

    #[test]
    fn non_object_payload_yields_defaults() {
        assert_eq!(normalize_sample(&json!([1, 2, 3])), RawReading::default());
        assert_eq!(normalize_sample(&json!(null)), RawReading::default());
    }
}
