//! Session ledger.
//!
//! A JSON file listing every backup that finished, so a later restore can
//! find the session id to restore from.

use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A finished backup session. Storage URIs are stored redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub cluster: String,
    pub session_id: SessionId,
    pub pd_addr: String,
    pub full_target: String,
    pub incremental_target: String,
    pub br_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct SessionLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a record, rewriting the file atomically.
    pub async fn append(&self, record: &BackupRecord) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await?;
        records.push(record.clone());

        let json = serde_json::to_vec_pretty(&records).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(
            cluster = %record.cluster,
            session_id = %record.session_id,
            "recorded backup session in {}",
            self.path.display()
        );
        Ok(())
    }

    /// Records of one cluster, oldest first.
    pub async fn list(&self, cluster: &str) -> Result<Vec<BackupRecord>, LedgerError> {
        let mut records: Vec<_> = self
            .load()
            .await?
            .into_iter()
            .filter(|r| r.cluster == cluster)
            .collect();
        records.sort_by_key(|r| r.finished_at);
        Ok(records)
    }

    /// Most recently finished session of a cluster.
    pub async fn latest(&self, cluster: &str) -> Result<Option<BackupRecord>, LedgerError> {
        Ok(self.list(cluster).await?.pop())
    }

    /// Look up one session of a cluster.
    pub async fn find(
        &self,
        cluster: &str,
        session_id: &SessionId,
    ) -> Result<Option<BackupRecord>, LedgerError> {
        Ok(self
            .list(cluster)
            .await?
            .into_iter()
            .find(|r| &r.session_id == session_id))
    }

    /// Look up a session id across all clusters.
    pub async fn find_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<BackupRecord>, LedgerError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|r| &r.session_id == session_id))
    }

    async fn load(&self) -> Result<Vec<BackupRecord>, LedgerError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&content).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
