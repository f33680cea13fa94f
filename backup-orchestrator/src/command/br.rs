//! BR (backup & restore) command lines.

use super::{BuildError, Operation, ToolBinary, ToolInvocation};
use crate::storage::StorageTarget;

/// The BR subcommands the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrMode {
    Backup,
    Restore,
    LogRestore,
}

impl BrMode {
    pub const ALL: [BrMode; 3] = [BrMode::Backup, BrMode::Restore, BrMode::LogRestore];

    pub fn operation(&self) -> Operation {
        match self {
            BrMode::Backup => Operation::FullBackup,
            BrMode::Restore => Operation::FullRestore,
            BrMode::LogRestore => Operation::LogRestore,
        }
    }

    fn subcommand(&self) -> [&'static str; 2] {
        match self {
            BrMode::Backup => ["backup", "full"],
            BrMode::Restore => ["restore", "full"],
            BrMode::LogRestore => ["restore", "cdclog"],
        }
    }
}

/// Builds `br <subcommand> -u <pd> --log-format json -s <storage>`.
#[derive(Debug, Clone)]
pub struct BrCommandBuilder {
    binary: ToolBinary,
    mode: BrMode,
    args: Vec<String>,
    storage: Option<StorageTarget>,
}

impl BrCommandBuilder {
    pub fn new(binary: &ToolBinary, mode: BrMode, pd_addr: &str) -> Self {
        let [cmd, sub] = mode.subcommand();
        let args = vec![
            cmd.to_string(),
            sub.to_string(),
            "-u".to_string(),
            pd_addr.to_string(),
            "--log-format".to_string(),
            "json".to_string(),
        ];
        Self {
            binary: binary.clone(),
            mode,
            args,
            storage: None,
        }
    }

    /// Set the storage target. A later call replaces an earlier one.
    pub fn set_storage(&mut self, target: &StorageTarget) -> &mut Self {
        self.storage = Some(target.clone());
        self
    }

    pub fn build(self) -> Result<ToolInvocation, BuildError> {
        let operation = self.mode.operation();
        let Some(storage) = self.storage else {
            return Err(BuildError::MissingStorage(operation));
        };
        let mut args = self.args;
        args.push("-s".to_string());
        args.push(storage.as_str().to_string());
        Ok(ToolInvocation::new(
            self.binary,
            operation,
            args,
            Some(storage),
        ))
    }
}
