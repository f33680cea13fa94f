//! Structured log records and the running trace state built from them.

use super::{ProgressState, ProgressStatus};
use serde::Deserialize;
use serde_json::Value;

/// One JSON log line. Only `level` is mandatory.
#[derive(Debug, Deserialize)]
pub struct LogRecord {
    pub level: String,

    #[serde(default, alias = "msg")]
    pub message: Option<String>,

    #[serde(default, alias = "name")]
    pub step: Option<String>,

    #[serde(default, alias = "percent")]
    pub progress: Option<Value>,

    #[serde(default)]
    pub error: Option<String>,
}

impl LogRecord {
    /// Parse a line; anything that is not a JSON object with a `level` is `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.level.to_ascii_lowercase().as_str(),
            "error" | "fatal" | "panic" | "dpanic"
        )
    }

    /// Reported percentage, from either a number or a `"42.5%"` string.
    pub fn percent(&self) -> Option<f64> {
        let value = match self.progress.as_ref()? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
            _ => return None,
        };
        value.is_finite().then(|| value.clamp(0.0, 100.0))
    }

    fn failure_message(&self) -> String {
        match (&self.message, &self.error) {
            (Some(message), Some(error)) => format!("{}: {}", message, error),
            (Some(message), None) => message.clone(),
            (None, Some(error)) => error.clone(),
            (None, None) => format!("{} record without message", self.level),
        }
    }
}

/// Accumulated view across records of one process.
#[derive(Debug, Default)]
pub struct TraceState {
    phase: Option<String>,
    percent: Option<f64>,
}

impl TraceState {
    /// Fold one line into the state, yielding an update for structured records.
    pub fn observe(&mut self, line: &str) -> Option<ProgressState> {
        let Some(record) = LogRecord::parse(line) else {
            if !line.trim().is_empty() {
                tracing::debug!(line = %line.trim(), "skipping unstructured tool output");
            }
            return None;
        };

        if let Some(step) = record.step.as_deref().filter(|s| !s.is_empty()) {
            if self.phase.as_deref() != Some(step) {
                self.phase = Some(step.to_string());
                self.percent = None;
            }
        } else if self.phase.is_none() {
            self.phase = record.message.clone();
        }

        if let Some(percent) = record.percent() {
            // Never move backwards within a phase.
            self.percent = Some(self.percent.map_or(percent, |p| p.max(percent)));
        }

        let status = if record.is_fatal() {
            ProgressStatus::Failed(record.failure_message())
        } else {
            ProgressStatus::Running
        };

        Some(ProgressState {
            phase: self.phase.clone().unwrap_or_default(),
            percent: self.percent,
            status,
        })
    }
}
