//! Transports that run a whitelisted host script.
//!
//! Both transports hand the script path and every argument to the OS as
//! separate argv entries. Neither ever builds a shell string. `ssh` joins
//! its trailing arguments with spaces on the remote side, which is why the
//! executor refuses whitespace and metacharacters in every value.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// Raw outcome of one script run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs `script` with `args` on `host`.
pub trait CommandTransport: Send + Sync {
    fn execute(
        &self,
        host: &str,
        script: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = ProvisionResult<CommandOutput>> + Send;
}

/// SSH client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Directory on every host holding the whitelisted scripts.
    pub script_dir: String,
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "podfleet".into(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            script_dir: "/opt/podfleet/bin".into(),
            strict_host_key_checking: true,
        }
    }
}

/// Runs scripts on the target host through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, host: &str, script: &str, args: &[String]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-o")
            .arg(if self.config.strict_host_key_checking {
                "StrictHostKeyChecking=yes"
            } else {
                "StrictHostKeyChecking=accept-new"
            })
            .arg("-p")
            .arg(self.config.port.to_string());
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.config.user, host))
            .arg("--")
            .arg(format!(
                "{}/{}",
                self.config.script_dir.trim_end_matches('/'),
                script
            ))
            .args(args);
        cmd
    }
}

impl CommandTransport for SshTransport {
    async fn execute(
        &self,
        host: &str,
        script: &str,
        args: &[String],
        timeout: Duration,
    ) -> ProvisionResult<CommandOutput> {
        debug!(host, script, argc = args.len(), "Running remote script");
        run(self.command(host, script, args), script, timeout).await
    }
}

/// Runs scripts from a local directory. The target host is exported to
/// the script as `PODFLEET_TARGET_HOST`.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    script_dir: PathBuf,
}

impl LocalTransport {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }
}

impl CommandTransport for LocalTransport {
    async fn execute(
        &self,
        host: &str,
        script: &str,
        args: &[String],
        timeout: Duration,
    ) -> ProvisionResult<CommandOutput> {
        debug!(host, script, argc = args.len(), "Running local script");
        let mut cmd = Command::new(self.script_dir.join(script));
        cmd.args(args).env("PODFLEET_TARGET_HOST", host);
        run(cmd, script, timeout).await
    }
}

async fn run(mut cmd: Command, script: &str, timeout: Duration) -> ProvisionResult<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| ProvisionError::Spawn {
        script: script.to_string(),
        message: e.to_string(),
    })?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProvisionError::Timeout {
            operation: script.to_string(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| ProvisionError::Spawn {
            script: script.to_string(),
            message: e.to_string(),
        })?;

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
