use std::fs;
use std::io;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Delivers one raw telemetry sample per call.
pub trait TelemetrySource: Send + Sync + 'static {
    fn next_sample(&self) -> Result<Value, TelemetrySourceError>;
}

#[derive(Debug, Error)]
pub enum TelemetrySourceError {
    #[error("telemetry source i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("telemetry payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("telemetry replay exhausted")]
    Exhausted,
}

impl TelemetrySourceError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptFile {
    #[serde(default = "default_loop")]
    loop_forever: bool,
    samples: Vec<ScriptEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptEvent {
    ok: Option<Value>,
    error: Option<String>,
}

fn default_loop() -> bool {
    true
}

/// Replays a JSON script of samples and injected failures.
#[derive(Debug)]
pub struct ScriptedTelemetrySource {
    script: ScriptFile,
    position: Mutex<usize>,
}

impl ScriptedTelemetrySource {
    pub fn from_file(path: &str) -> Result<Self, TelemetrySourceError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, TelemetrySourceError> {
        let script: ScriptFile = serde_json::from_str(content)?;

        if script.samples.is_empty() {
            return Err(TelemetrySourceError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "telemetry script must contain at least one sample",
            )));
        }

        Ok(Self {
            script,
            position: Mutex::new(0),
        })
    }

    fn next_event(&self) -> Result<ScriptEvent, TelemetrySourceError> {
        let mut position = self
            .position
            .lock()
            .map_err(|_| io::Error::other("telemetry replay state lock poisoned"))?;

        if *position >= self.script.samples.len() {
            if !self.script.loop_forever {
                return Err(TelemetrySourceError::Exhausted);
            }
            *position = 0;
        }

        let event = self.script.samples.get(*position).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "telemetry script index out of bounds",
            )
        })?;
        *position = position.saturating_add(1);

        Ok(event)
    }
}

impl TelemetrySource for ScriptedTelemetrySource {
    fn next_sample(&self) -> Result<Value, TelemetrySourceError> {
        let event = self.next_event()?;
        match (event.ok, event.error) {
            (Some(payload), None) => Ok(payload),
            (None, Some(error)) => Err(map_script_error(&error)),
            _ => Err(TelemetrySourceError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "script event must contain exactly one of: ok or error",
            ))),
        }
    }
}

fn map_script_error(kind: &str) -> TelemetrySourceError {
    let normalized = kind.trim().to_ascii_lowercase();
    let error_kind = match normalized.as_str() {
        "timeout" => io::ErrorKind::TimedOut,
        "disconnected" | "broken_pipe" => io::ErrorKind::BrokenPipe,
        "connection_refused" => io::ErrorKind::ConnectionRefused,
        "invalid_json" => {
            return match serde_json::from_str::<Value>("{") {
                Err(err) => TelemetrySourceError::Json(err),
                Ok(_) => TelemetrySourceError::Io(io::Error::other(kind)),
            };
        }
        _ => {
            return TelemetrySourceError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown scripted error kind: {kind}"),
            ));
        }
    };
    TelemetrySourceError::Io(io::Error::new(error_kind, kind))
}
