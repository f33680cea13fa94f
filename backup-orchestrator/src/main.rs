//! cloud-backup - full + incremental cloud backup and restore of a cluster.

use anyhow::{Context, Result};
use backup_orchestrator::{
    command::ToolSet,
    config::Config,
    daemon::ShutdownCoordinator,
    ledger::SessionLedger,
    runner::{ProcessRunner, ToolEnv},
    session::SessionId,
    storage::StorageLayout,
    topology::FileTopology,
    utils, Orchestrator,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const LATEST: &str = "latest";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a full backup and start streaming incremental changes
    Backup {
        cluster: String,

        /// Use this session id instead of a fresh one
        #[arg(long)]
        session_id: Option<SessionId>,
    },

    /// Restore the full backup, then replay the incremental log
    Restore {
        cluster: String,

        /// Session id to restore, or "latest"
        #[arg(long, default_value = LATEST)]
        session: String,
    },

    /// List recorded backup sessions of a cluster
    Sessions { cluster: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting cloud-backup v{}", env!("CARGO_PKG_VERSION"));

    let ledger = SessionLedger::new(&config.ledger.path);
    if let Command::Sessions { cluster } = &args.command {
        return print_sessions(&ledger, cluster).await;
    }

    let credentials = config.credentials.resolve();
    if credentials.is_none() {
        tracing::warn!("No storage credentials configured, tools will use their defaults");
    }
    let tools = ToolSet::resolve(&config.tools)?;
    let storage = StorageLayout::new(&config.storage, credentials.as_ref())?;
    let runner = ProcessRunner::new(
        ToolEnv::for_br(credentials.as_ref()),
        ToolEnv::empty(),
        config.process.terminate_grace(),
    );

    let shutdown = ShutdownCoordinator::new();
    let orchestrator = Orchestrator::new(
        FileTopology::new(&config.cluster.topology_dir),
        runner,
        tools,
        storage,
        ledger,
    )
    .with_cancellation(shutdown.token());

    let signals = tokio::spawn(async move { shutdown.wait_for_signal().await });

    let outcome = run(&orchestrator, args.command).await;
    signals.abort();
    outcome
}

async fn run(
    orchestrator: &Orchestrator<FileTopology, ProcessRunner>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Backup {
            cluster,
            session_id,
        } => {
            let record = match session_id {
                Some(id) => orchestrator.backup_to_cloud_as(&cluster, id).await?,
                None => orchestrator.backup_to_cloud(&cluster).await?,
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Restore { cluster, session } => {
            let session_id = if session == LATEST {
                orchestrator.latest_session(&cluster).await?
            } else {
                session
                    .parse::<SessionId>()
                    .with_context(|| format!("invalid session id {:?}", session))?
            };
            orchestrator.restore_from_cloud(&cluster, session_id).await?;
            println!("restored {} from session {}", cluster, session_id);
        }
        Command::Sessions { cluster } => {
            print_sessions(orchestrator.ledger(), &cluster).await?;
        }
    }
    Ok(())
}

async fn print_sessions(ledger: &SessionLedger, cluster: &str) -> Result<()> {
    let records = ledger.list(cluster).await?;
    if records.is_empty() {
        tracing::info!("No backup sessions recorded for {}", cluster);
    }
    for record in records {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
