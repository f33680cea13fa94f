//! Child process plumbing for tool invocations.

use crate::command::ToolInvocation;
use crate::config::{Credentials, ACCESS_KEY_ENV, SECRET_KEY_ENV};
use crate::utils::errors::ToolError;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// The complete environment a tool process gets. Nothing is inherited.
#[derive(Clone, Default)]
pub struct ToolEnv {
    vars: Vec<(String, String)>,
}

impl ToolEnv {
    pub fn empty() -> Self {
        Self::default()
    }

    /// BR needs storage keys and must log to the terminal (our pipe).
    pub fn for_br(credentials: Option<&Credentials>) -> Self {
        let mut env = Self::empty();
        if let Some(creds) = credentials {
            env = env
                .with(ACCESS_KEY_ENV, &creds.access_key)
                .with(SECRET_KEY_ENV, &creds.secret_key);
        }
        env.with("BR_LOG_TO_TERM", "1")
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.push((key.to_string(), value.to_string()));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(k, _)| k.as_str())
    }

    pub(crate) fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

impl fmt::Debug for ToolEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

pub(crate) fn command_for(invocation: &ToolInvocation, env: &ToolEnv) -> Command {
    let mut cmd = Command::new(invocation.program());
    cmd.args(invocation.args()).stdin(Stdio::null());
    env.apply(&mut cmd);
    cmd
}

/// Handle to a running long-lived tool process.
pub struct ToolProcess {
    child: Child,
    tool: String,
    grace: Duration,
}

impl ToolProcess {
    pub(crate) fn new(child: Child, tool: String, grace: Duration) -> Self {
        Self { child, tool, grace }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, ToolError> {
        self.child.wait().await.map_err(|source| ToolError::Io {
            tool: self.tool.clone(),
            source,
        })
    }

    /// Ask the process to stop, then kill it if it outlives the grace period.
    pub async fn terminate(&mut self) -> Result<(), ToolError> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                debug!(tool = %self.tool, pid, "sending SIGTERM");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(tool = %self.tool, pid, "SIGTERM failed: {}", e);
                }
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(ToolError::Io {
                tool: self.tool.clone(),
                source,
            }),
            Err(_) => {
                warn!(tool = %self.tool, "did not exit within {:?}, killing", self.grace);
                self.child.kill().await.map_err(|source| ToolError::Io {
                    tool: self.tool.clone(),
                    source,
                })
            }
        }
    }
}
