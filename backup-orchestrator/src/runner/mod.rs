//! Process runner - launches BR and cdc as child processes.
//!
//! Long-running tools (BR) are spawned with stdout piped into a
//! [`ProgressTracer`]; short control queries (cdc) run to completion with
//! their output captured.

pub mod process;

pub use process::{ToolEnv, ToolProcess};

use crate::command::{ToolInvocation, ToolKind};
use crate::progress::ProgressTracer;
use crate::utils::errors::ToolError;
use bytes::Bytes;
use futures_util::StreamExt;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to keep reading progress after the tool exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes tool invocations on behalf of the orchestrator.
pub trait ToolRunner: Send + Sync {
    /// Run a long-lived tool until it exits, tracing its progress.
    fn run_to_completion(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), ToolError>> + Send;

    /// Run a short query to completion and return its stdout.
    fn run_captured(
        &self,
        invocation: &ToolInvocation,
    ) -> impl Future<Output = Result<Bytes, ToolError>> + Send;
}

/// Runs tools as real OS processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    br_env: ToolEnv,
    cdc_env: ToolEnv,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(br_env: ToolEnv, cdc_env: ToolEnv, grace: Duration) -> Self {
        Self {
            br_env,
            cdc_env,
            grace,
        }
    }

    fn env_for(&self, invocation: &ToolInvocation) -> &ToolEnv {
        match invocation.operation().tool() {
            ToolKind::Br => &self.br_env,
            ToolKind::Cdc => &self.cdc_env,
        }
    }

    /// Start a tool and hand back its process handle plus a progress tracer
    /// over its stdout. Does not wait for anything.
    pub fn spawn_traced(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<(ToolProcess, ProgressTracer<ChildStdout>), ToolError> {
        let tool = invocation.tool_name();
        let mut cmd = process::command_for(invocation, self.env_for(invocation));
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        info!(tool = %tool, "executing {}", invocation);
        let mut child = cmd.spawn().map_err(|source| ToolError::Launch {
            tool: tool.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ToolError::Io {
            tool: tool.clone(),
            source: std::io::Error::other("stdout was not piped"),
        })?;

        Ok((
            ToolProcess::new(child, tool, self.grace),
            ProgressTracer::new(stdout),
        ))
    }

    /// Run a tool to completion, capturing stdout and stderr.
    pub async fn capture(&self, invocation: &ToolInvocation) -> Result<Bytes, ToolError> {
        let tool = invocation.tool_name();
        let mut cmd = process::command_for(invocation, self.env_for(invocation));
        cmd.kill_on_drop(true);

        info!(tool = %tool, "executing {}", invocation);
        let output = cmd.output().await.map_err(|source| ToolError::Launch {
            tool: tool.clone(),
            source,
        })?;

        if output.status.success() {
            Ok(Bytes::from(output.stdout))
        } else {
            Err(ToolError::Exited {
                tool,
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

impl ToolRunner for ProcessRunner {
    async fn run_to_completion(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let (process, tracer) = self.spawn_traced(invocation)?;
        supervise(process, tracer, cancel).await
    }

    async fn run_captured(&self, invocation: &ToolInvocation) -> Result<Bytes, ToolError> {
        self.capture(invocation).await
    }
}

/// Wait for a traced process while draining its progress.
///
/// The process is terminated early when `cancel` fires or the tracer sees a
/// fatal record. Success means exit code 0 and no fatal record.
pub async fn supervise<R>(
    mut process: ToolProcess,
    tracer: ProgressTracer<R>,
    cancel: &CancellationToken,
) -> Result<(), ToolError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let tool = process.tool().to_string();
    let (fatal_tx, mut fatal_rx) = oneshot::channel::<String>();

    let drain_tool = tool.clone();
    let mut drain = tokio::spawn(async move {
        let mut tracer = tracer;
        let mut fatal_tx = Some(fatal_tx);
        while let Some(update) = tracer.next().await {
            match update.error() {
                None => info!(
                    tool = %drain_tool,
                    phase = %update.phase,
                    percent = ?update.percent,
                    "progress"
                ),
                Some(message) => {
                    error!(tool = %drain_tool, phase = %update.phase, "{}", message);
                    if let Some(tx) = fatal_tx.take() {
                        let _ = tx.send(message.to_string());
                    }
                }
            }
        }
        // Keep the pipe open and empty until the tool closes it.
        let mut rest = tracer.into_inner();
        if let Err(e) = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
            debug!(tool = %drain_tool, "stopped draining stdout: {}", e);
        }
    });

    let status = tokio::select! {
        status = process.wait() => status?,
        Ok(message) = &mut fatal_rx => {
            warn!(tool = %tool, "stopping after fatal log record");
            process.terminate().await?;
            drain.abort();
            return Err(ToolError::Fatal { tool, message });
        }
        _ = cancel.cancelled() => {
            warn!(tool = %tool, "cancellation requested, stopping");
            process.terminate().await?;
            drain.abort();
            return Err(ToolError::Cancelled { tool });
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, &mut drain).await.is_err() {
        warn!(tool = %tool, "stdout still open after exit, abandoning progress");
        drain.abort();
    }

    match (status.success(), fatal_rx.try_recv().ok()) {
        (_, Some(message)) => Err(ToolError::Fatal { tool, message }),
        (true, None) => {
            info!(tool = %tool, "finished successfully");
            Ok(())
        }
        (false, None) => Err(ToolError::Exited {
            tool,
            code: status.code(),
            stdout: String::new(),
            stderr: String::new(),
        }),
    }
}
