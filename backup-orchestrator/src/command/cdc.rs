//! TiCDC control CLI command lines and error classification.

use super::{BuildError, Operation, ToolBinary, ToolInvocation};
use crate::storage::StorageTarget;
use crate::utils::errors::ToolError;

/// Printed by `cdc cli changefeed query` when the id is unknown.
const CHANGEFEED_NOT_EXISTS: &str = "ErrChangeFeedNotExists";
/// Printed by `cdc cli changefeed create` when the id is taken.
const CHANGEFEED_ALREADY_EXISTS: &str = "ErrChangeFeedAlreadyExists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcMode {
    Create,
    Query,
}

impl CdcMode {
    pub const ALL: [CdcMode; 2] = [CdcMode::Create, CdcMode::Query];

    pub fn operation(&self) -> Operation {
        match self {
            CdcMode::Create => Operation::ChangefeedCreate,
            CdcMode::Query => Operation::ChangefeedQuery,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            CdcMode::Create => "create",
            CdcMode::Query => "query",
        }
    }
}

/// Builds `cdc cli changefeed <verb> --pd <pd> --changefeed-id <id> [--sink-uri <storage>]`.
#[derive(Debug, Clone)]
pub struct CdcCommandBuilder {
    binary: ToolBinary,
    mode: CdcMode,
    args: Vec<String>,
    storage: Option<StorageTarget>,
}

impl CdcCommandBuilder {
    pub fn new(binary: &ToolBinary, mode: CdcMode, changefeed_id: &str, pd_addr: &str) -> Self {
        let args = vec![
            "cli".to_string(),
            "changefeed".to_string(),
            mode.verb().to_string(),
            "--pd".to_string(),
            pd_addr.to_string(),
            "--changefeed-id".to_string(),
            changefeed_id.to_string(),
        ];
        Self {
            binary: binary.clone(),
            mode,
            args,
            storage: None,
        }
    }

    /// Set the sink. A later call replaces an earlier one.
    pub fn set_storage(&mut self, target: &StorageTarget) -> &mut Self {
        self.storage = Some(target.clone());
        self
    }

    pub fn build(self) -> Result<ToolInvocation, BuildError> {
        let operation = self.mode.operation();
        if operation.requires_storage() && self.storage.is_none() {
            return Err(BuildError::MissingStorage(operation));
        }
        let mut args = self.args;
        if let Some(storage) = &self.storage {
            args.push("--sink-uri".to_string());
            args.push(storage.as_str().to_string());
        }
        Ok(ToolInvocation::new(
            self.binary,
            operation,
            args,
            self.storage,
        ))
    }
}

/// Closed set of control-tool failures the workflows branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlFailure {
    ChangefeedNotFound,
    ChangefeedAlreadyExists,
    Unknown,
}

impl CtlFailure {
    /// Map a failed cdc invocation onto a named failure kind.
    ///
    /// Only a nonzero exit carries tool output; launch errors and the like
    /// are always `Unknown`.
    pub fn classify(err: &ToolError) -> Self {
        match err {
            ToolError::Exited { stdout, stderr, .. } => {
                let mentions = |needle: &str| stdout.contains(needle) || stderr.contains(needle);
                if mentions(CHANGEFEED_NOT_EXISTS) {
                    CtlFailure::ChangefeedNotFound
                } else if mentions(CHANGEFEED_ALREADY_EXISTS) {
                    CtlFailure::ChangefeedAlreadyExists
                } else {
                    CtlFailure::Unknown
                }
            }
            _ => CtlFailure::Unknown,
        }
    }
}
