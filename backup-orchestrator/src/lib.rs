//! Backup Orchestrator Library
//!
//! Drives full and incremental cloud backup/restore of a cluster by
//! sequencing BR and TiCDC invocations.

pub mod command;
pub mod config;
pub mod daemon;
pub mod ledger;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod session;
pub mod storage;
pub mod topology;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use utils::errors::{OrchestratorError, ToolError};
pub type Result<T> = std::result::Result<T, OrchestratorError>;
