//! Custom error types for the backup orchestrator.

use crate::command::{BuildError, Operation};
use crate::ledger::LedgerError;
use crate::session::SessionId;
use crate::storage::StorageError;
use crate::topology::{Role, TopologyError};
use thiserror::Error;

/// Failure of a single external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}", describe_exit(.code))]
    Exited {
        tool: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{tool} logged a fatal error: {message}")]
    Fatal { tool: String, message: String },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    #[error("I/O error while supervising {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid cluster name {0:?}: only letters, digits, '.', '_' and '-' are allowed")]
    InvalidClusterName(String),

    #[error("cluster {cluster} doesn't have any {role} server")]
    MissingRole { cluster: String, role: Role },

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("a backup or restore of cluster {0} is already running")]
    Busy(String),

    #[error("backup session {0} is already in use")]
    SessionInUse(SessionId),

    #[error("Command error: {0}")]
    Build(#[from] BuildError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{step} failed: {source}")]
    Step {
        step: Operation,
        #[source]
        source: ToolError,
    },

    #[error("backup to cloud is enabled already (changefeed {changefeed_id})")]
    AlreadyEnabled { changefeed_id: String },

    #[error("run getChangeFeed failed and error not expected: {source}")]
    ChangefeedQuery {
        #[source]
        source: ToolError,
    },

    #[error("no recorded backup session for cluster {0}")]
    NoSession(String),

    #[error("backup {session_id} finished but could not be recorded: {source}")]
    Ledger {
        session_id: SessionId,
        #[source]
        source: LedgerError,
    },

    #[error("Session ledger error: {0}")]
    LedgerRead(#[source] LedgerError),

    #[error("Tool resolution error: {0}")]
    ToolResolution(String),

    #[error("operation cancelled before {0}")]
    Cancelled(Operation),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
