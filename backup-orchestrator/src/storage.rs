//! Object-storage targets for backup artifacts.
//!
//! Each backup session writes two artifacts, `<base>/<session>/full` and
//! `<base>/<session>/inc`. The tools talk to storage directly, so the URI
//! carries the endpoint and, when configured, the access keys.

use crate::config::{Credentials, StorageConfig};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

const REDACTED: &str = "redacted";
const SECRET_PARAMS: &[&str] = &["access-key", "secret-access-key"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid storage base {base:?}: {reason}")]
    InvalidBase { base: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "inc")]
    Incremental,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "inc",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage URI for one artifact. `Display` and `Debug` hide credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageTarget {
    uri: String,
    redacted: String,
}

impl StorageTarget {
    /// Full URI including credentials, for handing to a tool.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StorageTarget").field(&self.redacted).finish()
    }
}

/// Validated storage settings that derive per-session targets.
#[derive(Clone)]
pub struct StorageLayout {
    base: Url,
    endpoint: Option<String>,
    region: Option<String>,
    force_path_style: bool,
    credentials: Option<Credentials>,
}

impl StorageLayout {
    pub fn new(
        config: &StorageConfig,
        credentials: Option<&Credentials>,
    ) -> Result<Self, StorageError> {
        let invalid = |reason: String| StorageError::InvalidBase {
            base: config.base.clone(),
            reason,
        };

        let base = Url::parse(&config.base).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("URI has no path component".to_string()));
        }
        if base.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing bucket".to_string()));
        }

        Ok(Self {
            base,
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
            force_path_style: config.force_path_style,
            credentials: credentials.cloned(),
        })
    }

    /// Target for one artifact of a session. Same inputs, same URI.
    pub fn target(&self, session: &SessionId, kind: BackupKind) -> Result<StorageTarget, StorageError> {
        let mut url = self.base.clone();
        url.set_fragment(None);
        {
            let mut segments = url.path_segments_mut().map_err(|_| StorageError::InvalidBase {
                base: self.base.to_string(),
                reason: "URI has no path component".to_string(),
            })?;
            segments
                .pop_if_empty()
                .push(&session.to_string())
                .push(kind.as_str());
        }

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(endpoint) = &self.endpoint {
            params.push(("endpoint", endpoint.clone()));
        }
        if let Some(region) = &self.region {
            params.push(("region", region.clone()));
        }
        if self.force_path_style {
            params.push(("force-path-style", "true".to_string()));
        }
        if let Some(creds) = &self.credentials {
            params.push(("access-key", creds.access_key.clone()));
            params.push(("secret-access-key", creds.secret_key.clone()));
        }
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }

        let redacted = redact(&url);
        Ok(StorageTarget {
            uri: url.to_string(),
            redacted,
        })
    }
}

fn redact(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_PARAMS.iter().any(|p| *p == k) {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();

    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}
