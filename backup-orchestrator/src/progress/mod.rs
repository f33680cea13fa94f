//! Progress tracking for running BR processes.
//!
//! BR runs with `--log-format json`, so every stdout line is one log record.
//! The tracer turns those records into [`ProgressState`] updates.

pub mod record;
pub mod tracer;

pub use tracer::ProgressTracer;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    Running,
    Failed(String),
}

/// Snapshot of one tool process as seen through its log.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    /// Current phase label
    pub phase: String,

    /// Percentage complete (0-100), when the tool reports one
    pub percent: Option<f64>,

    pub status: ProgressStatus,
}

impl ProgressState {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ProgressStatus::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            ProgressStatus::Failed(message) => Some(message),
            ProgressStatus::Running => None,
        }
    }
}
