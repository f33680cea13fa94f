//! Periodic checkpoint submission.

use crate::api::{CheckpointApi, ClusterInfo, CreateCheckpointRequest};
use crate::error::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const UPLOAD_FINISHED: &str = "finish";
const UPLOAD_COMPLETE_PERCENT: u8 = 100;

#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub cluster_id: String,
    pub auth_key: String,
    pub url: String,
    pub operator: String,
    pub interval: Duration,
}

pub struct Reporter<A> {
    api: A,
    settings: ReporterSettings,
}

impl<A: CheckpointApi> Reporter<A> {
    pub fn new(api: A, settings: ReporterSettings) -> Self {
        Self { api, settings }
    }

    /// Report on every tick until cancelled. Returns the number of
    /// checkpoints created; any API failure ends the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<u64> {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            cluster_id = %self.settings.cluster_id,
            "reporting checkpoints every {:?}",
            period
        );

        let mut created = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(created, "checkpoint reporter stopped");
                    return Ok(created);
                }
                _ = ticker.tick() => {
                    if self.report_once(&cancel).await? {
                        created += 1;
                    }
                }
            }
        }
    }

    /// One tick. Returns whether a checkpoint was created.
    async fn report_once(&self, cancel: &CancellationToken) -> Result<bool> {
        let info = self.api.cluster_info(&self.settings.cluster_id).await?;
        if !info.is_ready() {
            debug!(
                cluster_id = %self.settings.cluster_id,
                setup_status = %info.setup_status,
                "cluster not ready, skipping checkpoint"
            );
            return Ok(false);
        }
        if cancel.is_cancelled() {
            return Ok(false);
        }

        let request = self.checkpoint_request(&info);
        let id = self.api.create_checkpoint(&request).await?;
        info!(checkpoint_id = %id, "Checkpoint {} created.", id);
        Ok(true)
    }

    fn checkpoint_request(&self, info: &ClusterInfo) -> CreateCheckpointRequest {
        CreateCheckpointRequest {
            auth_key: self.settings.auth_key.clone(),
            cluster_id: self.settings.cluster_id.clone(),
            upload_status: UPLOAD_FINISHED.to_string(),
            upload_progress: UPLOAD_COMPLETE_PERCENT,
            checkpoint_time: Utc::now().timestamp_millis(),
            url: self.settings.url.clone(),
            backup_size: info.backup_size.unwrap_or(0),
            operator: self.settings.operator.clone(),
        }
    }
}
