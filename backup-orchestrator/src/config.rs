//! Configuration management for the backup orchestrator.
//!
//! Loads configuration from a TOML file; storage credentials can be
//! overridden from the environment (`AWS_ACCESS_KEY` / `AWS_SECRET_KEY`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub cluster: ClusterConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// BR binary (looked up in PATH when unset)
    #[serde(default)]
    pub br_path: Option<PathBuf>,

    /// Control tool binary; `cdc` is expected in the same directory
    #[serde(default)]
    pub ctl_path: Option<PathBuf>,

    /// Component version, normally the cluster version
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URI, e.g. `s3://bucket/prefix`
    pub base: String,

    /// Custom S3 endpoint (MinIO etc.)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Object-storage access keys handed to the tools.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"***")
            .field("secret_key", &"***")
            .finish()
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl CredentialsConfig {
    /// Both keys, or nothing.
    pub fn resolve(&self) -> Option<Credentials> {
        match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Directory holding `<cluster>/topology.toml`
    pub topology_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON file recording finished backup sessions
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Seconds between SIGTERM and SIGKILL when stopping a tool
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
}

impl ProcessConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            terminate_grace_secs: default_terminate_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_terminate_grace_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Let `AWS_ACCESS_KEY` / `AWS_SECRET_KEY` replace the file's keys.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ACCESS_KEY_ENV) {
            self.credentials.access_key = Some(key);
        }
        if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
            self.credentials.secret_key = Some(secret);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tools: ToolsConfig {
                br_path: None,
                ctl_path: None,
                version: "nightly".to_string(),
            },
            storage: StorageConfig {
                base: "s3://backups/clusters".to_string(),
                endpoint: None,
                region: None,
                force_path_style: false,
            },
            credentials: CredentialsConfig::default(),
            cluster: ClusterConfig {
                topology_dir: PathBuf::from("/var/lib/cloud-backup/clusters"),
            },
            ledger: LedgerConfig {
                path: PathBuf::from("/var/lib/cloud-backup/sessions.json"),
            },
            process: ProcessConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[tools]
ctl_path = "/root/.tiup/components/ctl/v5.0.0/ctl"
version = "v5.0.0"

[storage]
base = "s3://tmp/br-restore"
endpoint = "http://minio.local:9000"
force_path_style = true

[credentials]
access_key = "minioadmin"
secret_key = "minioadmin"

[cluster]
topology_dir = "/root/.tiup/storage/cluster/clusters"

[ledger]
path = "/var/lib/cloud-backup/sessions.json"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.tools.version, "v5.0.0");
        assert!(config.tools.br_path.is_none());
        assert!(config.storage.force_path_style);
        assert_eq!(config.process.terminate_grace(), Duration::from_secs(10));
        assert_eq!(config.log.level, "info");
        assert!(config.credentials.resolve().is_some());
    }

    #[test]
    fn test_partial_credentials_resolve_to_none() {
        let creds = CredentialsConfig {
            access_key: Some("key".to_string()),
            secret_key: None,
        };
        assert!(creds.resolve().is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let shown = format!("{:?}", config);
        assert!(!shown.contains("minioadmin"));
        let shown = format!("{:?}", config.credentials.resolve().unwrap());
        assert!(!shown.contains("minioadmin"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.base, "s3://tmp/br-restore");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
