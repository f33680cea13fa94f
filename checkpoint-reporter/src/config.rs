//! Command-line configuration for the reporter daemon.

use crate::error::{ReporterError, Result};
use crate::reporter::ReporterSettings;
use crate::sink::OutputSink;
use clap::Parser;
use std::time::Duration;

const DEFAULT_STORAGE_URL: &str = "s3://pcloud2021/backups";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Reports backup checkpoints to the cloud control plane", long_about = None)]
pub struct ReporterConfig {
    /// The cluster to report checkpoints for
    #[arg(long, env = "CHECKPOINT_CLUSTER_ID")]
    pub cluster_id: String,

    /// Auth key of the account owning the cluster
    #[arg(long, env = "CHECKPOINT_AUTH_KEY", hide_env_values = true)]
    pub auth_key: String,

    /// Seconds between checkpoints
    #[arg(long, env = "CHECKPOINT_INTERVAL", default_value_t = 60)]
    pub checkpoint_interval: u64,

    /// Storage URL recorded with every checkpoint
    #[arg(long, default_value = DEFAULT_STORAGE_URL)]
    pub url: String,

    /// Base URL of the checkpoint API
    #[arg(long, env = "CHECKPOINT_API_URL")]
    pub api_url: String,

    /// Operator recorded with every checkpoint (defaults to the hostname)
    #[arg(long)]
    pub operator: Option<String>,

    /// Where log output goes; "-" for stdout
    #[arg(long, default_value = "./log.txt")]
    pub log_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ReporterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(ReporterError::Config("--cluster-id must not be empty".into()));
        }
        if self.auth_key.is_empty() {
            return Err(ReporterError::Config("--auth-key must not be empty".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(ReporterError::Config(
                "--checkpoint-interval must be at least one second".into(),
            ));
        }
        reqwest::Url::parse(&self.api_url)
            .map_err(|e| ReporterError::Config(format!("invalid --api-url {:?}: {}", self.api_url, e)))?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval)
    }

    pub fn operator(&self) -> String {
        match &self.operator {
            Some(operator) => operator.clone(),
            None => hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    pub fn sink(&self) -> OutputSink {
        OutputSink::parse(&self.log_file)
    }

    pub fn settings(&self) -> ReporterSettings {
        ReporterSettings {
            cluster_id: self.cluster_id.clone(),
            auth_key: self.auth_key.clone(),
            url: self.url.clone(),
            operator: self.operator(),
            interval: self.interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ReporterConfig {
        let mut args = vec![
            "checkpoint-reporter",
            "--cluster-id",
            "c-42",
            "--auth-key",
            "key",
            "--api-url",
            "https://cloud.example.com",
        ];
        args.extend_from_slice(extra);
        ReporterConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.url, "s3://pcloud2021/backups");
        assert_eq!(config.sink(), OutputSink::File("./log.txt".into()));
        assert!(config.validate().is_ok());
        assert!(!config.operator().is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--checkpoint-interval",
            "5",
            "--operator",
            "ops",
            "--log-file",
            "-",
        ]);
        let settings = config.settings();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.operator, "ops");
        assert_eq!(config.sink(), OutputSink::Stdout);
    }

    #[test]
    fn test_validation() {
        assert!(parse(&["--checkpoint-interval", "0"]).validate().is_err());

        let mut config = parse(&[]);
        config.api_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ReporterError::Config(_))));
    }
}
