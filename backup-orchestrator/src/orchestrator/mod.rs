//! Cloud backup and restore workflows.
//!
//! A cloud backup is a BR full backup followed by a TiCDC changefeed that
//! streams every later change to the incremental target of the same
//! session. A cloud restore replays both artifacts in the same order.

pub mod inflight;

pub use inflight::{InflightGuard, InflightTracker};

use crate::command::{
    BrCommandBuilder, BrMode, CdcCommandBuilder, CdcMode, CtlFailure, Operation, ToolInvocation,
    ToolSet,
};
use crate::ledger::{BackupRecord, SessionLedger};
use crate::runner::ToolRunner;
use crate::session::{BackupSession, SessionId};
use crate::storage::{BackupKind, StorageLayout, StorageTarget};
use crate::topology::{is_valid_cluster_name, Role, Topology, TopologySource};
use crate::utils::errors::{OrchestratorError, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Orchestrator<T, R> {
    topology: T,
    runner: R,
    tools: ToolSet,
    storage: StorageLayout,
    ledger: SessionLedger,
    inflight: InflightTracker,
    sessions: InflightTracker,
    cancel: CancellationToken,
}

impl<T, R> Orchestrator<T, R>
where
    T: TopologySource,
    R: ToolRunner,
{
    pub fn new(
        topology: T,
        runner: R,
        tools: ToolSet,
        storage: StorageLayout,
        ledger: SessionLedger,
    ) -> Self {
        Self {
            topology,
            runner,
            tools,
            storage,
            ledger,
            inflight: InflightTracker::new(),
            sessions: InflightTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one tied to process shutdown.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Back up `cluster` under a fresh session id.
    pub async fn backup_to_cloud(&self, cluster: &str) -> Result<BackupRecord> {
        self.backup_to_cloud_as(cluster, SessionId::generate()).await
    }

    /// Back up `cluster` under the given session id.
    pub async fn backup_to_cloud_as(
        &self,
        cluster: &str,
        session_id: SessionId,
    ) -> Result<BackupRecord> {
        let _guard = self.enter(cluster)?;
        let _session_guard = self.claim_session(&session_id).await?;

        let topology = self.topology.topology(cluster)?;
        if topology.nodes_with_role(Role::Cdc).is_empty() {
            return Err(OrchestratorError::MissingRole {
                cluster: cluster.to_string(),
                role: Role::Cdc,
            });
        }
        let session = BackupSession {
            id: session_id,
            pd_addr: control_plane(cluster, &topology)?,
            br: self.tools.br.clone(),
            cdc: self.tools.cdc.clone(),
        };

        let full = self.storage.target(&session.id, BackupKind::Full)?;
        let incremental = self.storage.target(&session.id, BackupKind::Incremental)?;
        let started_at = Utc::now();
        info!(
            cluster = %cluster,
            session_id = %session.id,
            pd = %session.pd_addr,
            "starting cloud backup"
        );

        let mut backup = BrCommandBuilder::new(&session.br, BrMode::Backup, &session.pd_addr);
        backup.set_storage(&full);
        self.run_step(backup.build()?).await?;

        self.start_incremental_backup(&session, &incremental).await?;

        let record = BackupRecord {
            cluster: cluster.to_string(),
            session_id: session.id,
            pd_addr: session.pd_addr.clone(),
            full_target: full.redacted().to_string(),
            incremental_target: incremental.redacted().to_string(),
            br_version: session.br.version.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        self.ledger
            .append(&record)
            .await
            .map_err(|source| OrchestratorError::Ledger {
                session_id: session.id,
                source,
            })?;

        info!(
            cluster = %cluster,
            session_id = %session.id,
            "cloud backup enabled"
        );
        Ok(record)
    }

    /// Restore `cluster` from the artifacts of one backup session.
    pub async fn restore_from_cloud(&self, cluster: &str, session_id: SessionId) -> Result<()> {
        let _guard = self.enter(cluster)?;

        let topology = self.topology.topology(cluster)?;
        let pd_addr = control_plane(cluster, &topology)?;

        match self.ledger.find(cluster, &session_id).await {
            Ok(Some(record)) => debug!(
                cluster = %cluster,
                session_id = %session_id,
                "restoring backup finished at {}",
                record.finished_at
            ),
            Ok(None) => warn!(
                cluster = %cluster,
                session_id = %session_id,
                "session is not in the local ledger, restoring anyway"
            ),
            Err(e) => warn!("could not read session ledger: {}", e),
        }

        let full = self.storage.target(&session_id, BackupKind::Full)?;
        let incremental = self.storage.target(&session_id, BackupKind::Incremental)?;
        info!(
            cluster = %cluster,
            session_id = %session_id,
            pd = %pd_addr,
            "starting cloud restore"
        );

        let mut restore = BrCommandBuilder::new(&self.tools.br, BrMode::Restore, &pd_addr);
        restore.set_storage(&full);
        self.run_step(restore.build()?).await?;

        let mut log_restore = BrCommandBuilder::new(&self.tools.br, BrMode::LogRestore, &pd_addr);
        log_restore.set_storage(&incremental);
        self.run_step(log_restore.build()?).await?;

        info!(cluster = %cluster, session_id = %session_id, "cloud restore finished");
        Ok(())
    }

    /// Newest recorded session of a cluster.
    pub async fn latest_session(&self, cluster: &str) -> Result<SessionId> {
        self.ledger
            .latest(cluster)
            .await
            .map_err(OrchestratorError::LedgerRead)?
            .map(|record| record.session_id)
            .ok_or_else(|| OrchestratorError::NoSession(cluster.to_string()))
    }

    /// A session id names one storage prefix, so it may back up only once.
    async fn claim_session(&self, session_id: &SessionId) -> Result<InflightGuard> {
        let guard = self
            .sessions
            .try_acquire(&session_id.to_string())
            .ok_or(OrchestratorError::SessionInUse(*session_id))?;
        let recorded = self
            .ledger
            .find_session(session_id)
            .await
            .map_err(OrchestratorError::LedgerRead)?;
        if let Some(record) = recorded {
            warn!(
                session_id = %session_id,
                cluster = %record.cluster,
                "session id was already used"
            );
            return Err(OrchestratorError::SessionInUse(*session_id));
        }
        Ok(guard)
    }

    fn enter(&self, cluster: &str) -> Result<InflightGuard> {
        if !is_valid_cluster_name(cluster) {
            return Err(OrchestratorError::InvalidClusterName(cluster.to_string()));
        }
        self.inflight
            .try_acquire(cluster)
            .ok_or_else(|| OrchestratorError::Busy(cluster.to_string()))
    }

    fn ensure_not_cancelled(&self, step: Operation) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled(step));
        }
        Ok(())
    }

    async fn run_step(&self, invocation: ToolInvocation) -> Result<()> {
        let step = invocation.operation();
        self.ensure_not_cancelled(step)?;

        info!(step = %step, "running {}", step);
        self.runner
            .run_to_completion(&invocation, &self.cancel)
            .await
            .map_err(|source| OrchestratorError::Step { step, source })
    }

    /// Create the session's changefeed unless it already exists.
    async fn start_incremental_backup(
        &self,
        session: &BackupSession,
        sink: &StorageTarget,
    ) -> Result<()> {
        let changefeed_id = session.changefeed_id();

        self.ensure_not_cancelled(Operation::ChangefeedQuery)?;
        let query =
            CdcCommandBuilder::new(&session.cdc, CdcMode::Query, &changefeed_id, &session.pd_addr)
                .build()?;
        match self.runner.run_captured(&query).await {
            Ok(_) => return Err(OrchestratorError::AlreadyEnabled { changefeed_id }),
            Err(err) => match CtlFailure::classify(&err) {
                CtlFailure::ChangefeedNotFound => {
                    debug!(changefeed_id = %changefeed_id, "changefeed does not exist yet")
                }
                _ => return Err(OrchestratorError::ChangefeedQuery { source: err }),
            },
        }

        self.ensure_not_cancelled(Operation::ChangefeedCreate)?;
        let mut create =
            CdcCommandBuilder::new(&session.cdc, CdcMode::Create, &changefeed_id, &session.pd_addr);
        create.set_storage(sink);
        let create = create.build()?;

        info!(changefeed_id = %changefeed_id, "creating changefeed");
        match self.runner.run_captured(&create).await {
            Ok(_) => Ok(()),
            Err(err) => match CtlFailure::classify(&err) {
                CtlFailure::ChangefeedAlreadyExists => {
                    Err(OrchestratorError::AlreadyEnabled { changefeed_id })
                }
                _ => Err(OrchestratorError::Step {
                    step: Operation::ChangefeedCreate,
                    source: err,
                }),
            },
        }
    }
}

fn control_plane(cluster: &str, topology: &Topology) -> Result<String> {
    topology
        .control_plane_address()
        .ok_or_else(|| OrchestratorError::MissingRole {
            cluster: cluster.to_string(),
            role: Role::Pd,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ToolBinary;
    use crate::config::StorageConfig;
    use crate::topology::{Instance, TopologyError};
    use crate::utils::errors::ToolError;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CLUSTER: &str = "prod-1";
    const OTHER_CLUSTER: &str = "prod-2";

    struct FakeTopology {
        clusters: HashMap<String, Topology>,
    }

    impl TopologySource for FakeTopology {
        fn topology(&self, cluster: &str) -> std::result::Result<Topology, TopologyError> {
            self.clusters
                .get(cluster)
                .cloned()
                .ok_or_else(|| TopologyError::NotFound {
                    cluster: cluster.to_string(),
                    path: format!("/clusters/{}/topology.toml", cluster).into(),
                })
        }
    }

    #[derive(Clone, Copy)]
    enum Scripted {
        Succeed,
        Fail { code: i32, stderr: &'static str },
    }

    /// Records invocations and answers from a per-operation script.
    struct FakeRunner {
        script: HashMap<Operation, Scripted>,
        calls: Mutex<Vec<ToolInvocation>>,
    }

    impl FakeRunner {
        fn new() -> Self {
            let mut script = HashMap::new();
            script.insert(
                Operation::ChangefeedQuery,
                Scripted::Fail {
                    code: 1,
                    stderr: "Error: [CDC:ErrChangeFeedNotExists]changefeed not exists",
                },
            );
            Self {
                script,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, operation: Operation, outcome: Scripted) -> Self {
            self.script.insert(operation, outcome);
            self
        }

        fn answer(&self, invocation: &ToolInvocation) -> std::result::Result<(), ToolError> {
            self.calls.lock().unwrap().push(invocation.clone());
            match self
                .script
                .get(&invocation.operation())
                .copied()
                .unwrap_or(Scripted::Succeed)
            {
                Scripted::Succeed => Ok(()),
                Scripted::Fail { code, stderr } => Err(ToolError::Exited {
                    tool: invocation.tool_name(),
                    code: Some(code),
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        async fn run_to_completion(
            &self,
            invocation: &ToolInvocation,
            _cancel: &CancellationToken,
        ) -> std::result::Result<(), ToolError> {
            self.answer(invocation)
        }

        async fn run_captured(
            &self,
            invocation: &ToolInvocation,
        ) -> std::result::Result<Bytes, ToolError> {
            self.answer(invocation).map(|_| Bytes::new())
        }
    }

    fn node(role: Role, host: &str, port: u16) -> Instance {
        Instance {
            role,
            host: host.to_string(),
            port,
        }
    }

    fn topology(with_cdc: bool) -> FakeTopology {
        let mut instances = vec![
            node(Role::Tikv, "10.0.0.5", 20160),
            node(Role::Pd, "10.0.0.1", 2379),
            node(Role::Pd, "10.0.0.2", 2379),
        ];
        if with_cdc {
            instances.push(node(Role::Cdc, "10.0.0.9", 8300));
        }
        let mut clusters = HashMap::new();
        clusters.insert(CLUSTER.to_string(), Topology { instances: instances.clone() });
        clusters.insert(OTHER_CLUSTER.to_string(), Topology { instances });
        FakeTopology { clusters }
    }

    fn orchestrator(
        topology: FakeTopology,
        runner: FakeRunner,
    ) -> (Orchestrator<FakeTopology, FakeRunner>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolSet {
            br: ToolBinary::new("/opt/tiup/br", "v5.0.0"),
            cdc: ToolBinary::new("/opt/tiup/cdc", "v5.0.0"),
        };
        let storage = StorageLayout::new(
            &StorageConfig {
                base: "s3://backups/clusters".to_string(),
                endpoint: None,
                region: None,
                force_path_style: false,
            },
            None,
        )
        .unwrap();
        let ledger = SessionLedger::new(dir.path().join("sessions.json"));
        (Orchestrator::new(topology, runner, tools, storage, ledger), dir)
    }

    fn operations(orch: &Orchestrator<FakeTopology, FakeRunner>) -> Vec<Operation> {
        orch.runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.operation())
            .collect()
    }

    fn arg_after<'a>(invocation: &'a ToolInvocation, flag: &str) -> &'a str {
        let args = invocation.args();
        let pos = args.iter().position(|a| a == flag).unwrap();
        &args[pos + 1]
    }

    #[tokio::test]
    async fn test_backup_runs_full_then_changefeed() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());
        let session_id = SessionId::generate();

        let record = orch.backup_to_cloud_as(CLUSTER, session_id).await.unwrap();

        assert_eq!(
            operations(&orch),
            vec![
                Operation::FullBackup,
                Operation::ChangefeedQuery,
                Operation::ChangefeedCreate
            ]
        );
        let calls = orch.runner.calls.lock().unwrap().clone();
        assert_eq!(arg_after(&calls[0], "-u"), "http://10.0.0.1:2379");
        assert_eq!(
            arg_after(&calls[0], "-s"),
            format!("s3://backups/clusters/{}/full", session_id)
        );
        assert_eq!(
            arg_after(&calls[1], "--changefeed-id"),
            session_id.to_string()
        );
        assert_eq!(
            arg_after(&calls[2], "--sink-uri"),
            format!("s3://backups/clusters/{}/inc", session_id)
        );

        assert_eq!(record.session_id, session_id);
        assert_eq!(record.pd_addr, "http://10.0.0.1:2379");
        assert_eq!(record.br_version, "v5.0.0");
        assert_eq!(orch.latest_session(CLUSTER).await.unwrap(), session_id);
    }

    #[tokio::test]
    async fn test_backup_without_cdc_spawns_nothing() {
        let (orch, _dir) = orchestrator(topology(false), FakeRunner::new());

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::MissingRole { role: Role::Cdc, .. }
        ));
        assert!(operations(&orch).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_unknown_clusters() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());

        assert!(matches!(
            orch.backup_to_cloud("../etc").await,
            Err(OrchestratorError::InvalidClusterName(_))
        ));
        assert!(matches!(
            orch.backup_to_cloud("other").await,
            Err(OrchestratorError::Topology(TopologyError::NotFound { .. }))
        ));
        assert!(operations(&orch).is_empty());
    }

    #[tokio::test]
    async fn test_existing_changefeed_is_already_enabled() {
        let runner = FakeRunner::new().with(Operation::ChangefeedQuery, Scripted::Succeed);
        let (orch, _dir) = orchestrator(topology(true), runner);

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::AlreadyEnabled { .. }));
        assert!(err.to_string().contains("backup to cloud is enabled already"));
        assert_eq!(
            operations(&orch),
            vec![Operation::FullBackup, Operation::ChangefeedQuery]
        );
        assert!(matches!(
            orch.latest_session(CLUSTER).await,
            Err(OrchestratorError::NoSession(_))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_query_failure() {
        let runner = FakeRunner::new().with(
            Operation::ChangefeedQuery,
            Scripted::Fail {
                code: 1,
                stderr: "Error: dial tcp 10.0.0.1:2379: connection refused",
            },
        );
        let (orch, _dir) = orchestrator(topology(true), runner);

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::ChangefeedQuery { .. }));
        assert!(err
            .to_string()
            .starts_with("run getChangeFeed failed and error not expected"));
        assert!(!operations(&orch).contains(&Operation::ChangefeedCreate));
    }

    #[tokio::test]
    async fn test_create_conflict_is_already_enabled() {
        let runner = FakeRunner::new().with(
            Operation::ChangefeedCreate,
            Scripted::Fail {
                code: 1,
                stderr: "Error: [CDC:ErrChangeFeedAlreadyExists]changefeed already exists",
            },
        );
        let (orch, _dir) = orchestrator(topology(true), runner);

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyEnabled { .. }));
    }

    #[tokio::test]
    async fn test_failed_full_backup_stops_workflow() {
        let runner = FakeRunner::new().with(
            Operation::FullBackup,
            Scripted::Fail { code: 1, stderr: "" },
        );
        let (orch, _dir) = orchestrator(topology(true), runner);

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Step {
                step: Operation::FullBackup,
                ..
            }
        ));
        assert_eq!(operations(&orch), vec![Operation::FullBackup]);
    }

    #[tokio::test]
    async fn test_restore_uses_session_targets() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());
        let session_id = SessionId::generate();

        orch.restore_from_cloud(CLUSTER, session_id).await.unwrap();

        let calls = orch.runner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation(), Operation::FullRestore);
        assert_eq!(calls[1].operation(), Operation::LogRestore);
        assert_eq!(
            arg_after(&calls[0], "-s"),
            format!("s3://backups/clusters/{}/full", session_id)
        );
        assert_eq!(
            arg_after(&calls[1], "-s"),
            format!("s3://backups/clusters/{}/inc", session_id)
        );
    }

    #[tokio::test]
    async fn test_failed_full_restore_skips_log_restore() {
        let runner = FakeRunner::new().with(
            Operation::FullRestore,
            Scripted::Fail { code: 2, stderr: "" },
        );
        let (orch, _dir) = orchestrator(topology(true), runner);

        let err = orch
            .restore_from_cloud(CLUSTER, SessionId::generate())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Step {
                step: Operation::FullRestore,
                ..
            }
        ));
        assert_eq!(operations(&orch), vec![Operation::FullRestore]);
    }

    #[tokio::test]
    async fn test_concurrent_workflow_is_busy() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());

        let guard = orch.inflight.try_acquire(CLUSTER).unwrap();
        assert!(matches!(
            orch.restore_from_cloud(CLUSTER, SessionId::generate()).await,
            Err(OrchestratorError::Busy(_))
        ));
        assert!(operations(&orch).is_empty());

        drop(guard);
        assert!(orch.backup_to_cloud(CLUSTER).await.is_ok());
        assert_eq!(orch.inflight.running_count(), 0);
    }

    #[tokio::test]
    async fn test_session_id_is_not_reused_across_clusters() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());
        let session_id = SessionId::generate();

        orch.backup_to_cloud_as(CLUSTER, session_id).await.unwrap();
        let err = orch
            .backup_to_cloud_as(OTHER_CLUSTER, session_id)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::SessionInUse(id) if id == session_id));
        let full_backups = operations(&orch)
            .into_iter()
            .filter(|op| *op == Operation::FullBackup)
            .count();
        assert_eq!(full_backups, 1);
        assert_eq!(orch.latest_session(CLUSTER).await.unwrap(), session_id);
        assert!(matches!(
            orch.latest_session(OTHER_CLUSTER).await,
            Err(OrchestratorError::NoSession(_))
        ));
    }

    #[tokio::test]
    async fn test_session_held_by_running_backup_is_rejected() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());
        let session_id = SessionId::generate();

        let guard = orch.sessions.try_acquire(&session_id.to_string()).unwrap();
        assert!(matches!(
            orch.backup_to_cloud_as(OTHER_CLUSTER, session_id).await,
            Err(OrchestratorError::SessionInUse(_))
        ));
        assert!(operations(&orch).is_empty());
        assert_eq!(orch.inflight.running_count(), 0);

        drop(guard);
        assert!(orch.backup_to_cloud_as(OTHER_CLUSTER, session_id).await.is_ok());
        assert_eq!(orch.sessions.running_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let (orch, _dir) = orchestrator(topology(true), FakeRunner::new());
        orch.cancellation_token().cancel();

        let err = orch.backup_to_cloud(CLUSTER).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Cancelled(Operation::FullBackup)
        ));
        assert!(operations(&orch).is_empty());
    }
}
