//! Utility modules for the backup orchestrator.

pub mod errors;
pub mod logger;

pub use errors::{OrchestratorError, Result, ToolError};
