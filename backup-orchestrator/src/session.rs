//! Backup session identity.

use crate::command::ToolBinary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique id binding a session's full and incremental artifacts. Also used
/// as the changefeed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One backup lifecycle: who to talk to and with which binaries.
#[derive(Debug, Clone)]
pub struct BackupSession {
    pub id: SessionId,
    pub pd_addr: String,
    pub br: ToolBinary,
    pub cdc: ToolBinary,
}

impl BackupSession {
    pub fn changefeed_id(&self) -> String {
        self.id.to_string()
    }
}
