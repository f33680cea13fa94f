//! checkpoint-reporter - tells the cloud control plane that a cluster's
//! backups are current, once per interval, until stopped.

mod api;
mod config;
mod error;
mod reporter;
mod sink;

use anyhow::Result;
use api::CloudApiClient;
use clap::Parser;
use config::ReporterConfig;
use reporter::Reporter;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = ReporterConfig::parse();
    config.validate()?;

    let _sink = sink::init_logging(&config.log_level, &config.sink())?;

    tracing::info!(
        "Starting checkpoint-reporter v{} (cluster_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.cluster_id
    );

    let api = CloudApiClient::new(&config.api_url, &config.auth_key, REQUEST_TIMEOUT)?;
    let reporter = Reporter::new(api, config.settings());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match reporter.run(cancel).await {
        Ok(created) => {
            tracing::info!("Reporter stopped after {} checkpoints", created);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Checkpoint reporting failed: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
