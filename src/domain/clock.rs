use chrono::{DateTime, Local, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn to_iso8601(self) -> String {
        let datetime = DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Source of wall-clock time for the pipeline.
///
/// Rules that depend on the time of day read `local_hour` instead of the
/// system clock so that evaluation stays deterministic under test.
pub trait Clock {
    fn now(&self) -> TimestampMs;
    fn local_hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

#[cfg(test)]
mod tests {
    use super::TimestampMs;

    #[test]
    fn formats_timestamp_as_utc_iso8601() {
        assert_eq!(
            TimestampMs(1_700_000_000_000).to_iso8601(),
            "2023-11-14T22:13:20.000Z"
        );
    }

    #[test]
    fn serializes_as_plain_milliseconds() {
        let json = serde_json::to_string(&TimestampMs(42)).expect("timestamp should serialize");
        assert_eq!(json, "42");
    }
}
