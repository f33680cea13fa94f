//! Argument vectors for the external tools.
//!
//! BR and the TiCDC control CLI take different storage flags, so each tool
//! gets its own builder type: a `BrCommandBuilder` can only ever emit `-s`,
//! a `CdcCommandBuilder` only `--sink-uri`.

pub mod br;
pub mod cdc;

pub use br::{BrCommandBuilder, BrMode};
pub use cdc::{CdcCommandBuilder, CdcMode, CtlFailure};

use crate::config::ToolsConfig;
use crate::storage::StorageTarget;
use crate::utils::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Every operation the orchestrator can ask a tool to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    FullBackup,
    FullRestore,
    LogRestore,
    ChangefeedCreate,
    ChangefeedQuery,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::FullBackup,
        Operation::FullRestore,
        Operation::LogRestore,
        Operation::ChangefeedCreate,
        Operation::ChangefeedQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FullBackup => "full backup",
            Operation::FullRestore => "full restore",
            Operation::LogRestore => "log restore",
            Operation::ChangefeedCreate => "changefeed create",
            Operation::ChangefeedQuery => "changefeed query",
        }
    }

    /// Read-only operations may be built without a storage target.
    pub fn requires_storage(&self) -> bool {
        !matches!(self, Operation::ChangefeedQuery)
    }

    pub fn tool(&self) -> ToolKind {
        match self {
            Operation::FullBackup | Operation::FullRestore | Operation::LogRestore => ToolKind::Br,
            Operation::ChangefeedCreate | Operation::ChangefeedQuery => ToolKind::Cdc,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Br,
    Cdc,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Br => f.write_str("br"),
            ToolKind::Cdc => f.write_str("cdc"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0} requires a storage target but none was set")]
    MissingStorage(Operation),
}

/// A resolved tool binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinary {
    pub path: PathBuf,
    pub version: String,
}

impl ToolBinary {
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

/// The pair of binaries one backup session drives.
#[derive(Debug, Clone)]
pub struct ToolSet {
    pub br: ToolBinary,
    pub cdc: ToolBinary,
}

impl ToolSet {
    /// Resolve BR and the TiCDC CLI.
    ///
    /// BR comes from the configured path or `$PATH`. The cdc binary always
    /// lives next to the control tool (`ctl`).
    pub fn resolve(config: &ToolsConfig) -> Result<Self, OrchestratorError> {
        let br = match &config.br_path {
            Some(path) => path.clone(),
            None => which::which("br").map_err(|e| {
                OrchestratorError::ToolResolution(format!("br not found in PATH: {}", e))
            })?,
        };

        let ctl = match &config.ctl_path {
            Some(path) => path.clone(),
            None => which::which("ctl").map_err(|e| {
                OrchestratorError::ToolResolution(format!("ctl not found in PATH: {}", e))
            })?,
        };
        let cdc = ctl
            .parent()
            .map(|dir| dir.join("cdc"))
            .ok_or_else(|| {
                OrchestratorError::ToolResolution(format!(
                    "cannot locate cdc next to {}",
                    ctl.display()
                ))
            })?;

        tracing::info!("using BR version {}", config.version);

        Ok(Self {
            br: ToolBinary::new(br, config.version.clone()),
            cdc: ToolBinary::new(cdc, config.version.clone()),
        })
    }
}

/// An immutable, ready-to-run tool command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    binary: ToolBinary,
    operation: Operation,
    args: Vec<String>,
    storage: Option<StorageTarget>,
}

impl ToolInvocation {
    pub(crate) fn new(
        binary: ToolBinary,
        operation: Operation,
        args: Vec<String>,
        storage: Option<StorageTarget>,
    ) -> Self {
        Self {
            binary,
            operation,
            args,
            storage,
        }
    }

    pub fn program(&self) -> &Path {
        &self.binary.path
    }

    pub fn binary(&self) -> &ToolBinary {
        &self.binary
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn storage(&self) -> Option<&StorageTarget> {
        self.storage.as_ref()
    }

    /// Short tool name used in logs and errors.
    pub fn tool_name(&self) -> String {
        self.binary
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.operation.tool().to_string())
    }
}

/// Renders the command line with storage credentials redacted.
impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary.path.display())?;
        for arg in &self.args {
            match &self.storage {
                Some(target) if target.as_str() == arg => write!(f, " {}", target)?,
                _ => write!(f, " {}", arg)?,
            }
        }
        Ok(())
    }
}
