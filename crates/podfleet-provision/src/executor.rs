//! Safe command executor.
//!
//! A script runs only if its name is on [`ALLOWED_SCRIPTS`] and every
//! argument passes the validator for its [`ArgKind`]. Both checks happen
//! before the transport is touched. Rejections are logged and audited,
//! then returned as `InputRejected`.

use std::sync::LazyLock;
use std::time::Duration;

use podfleet_core::repository::Store;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::audit::{AuditRecorder, AuditScope};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::transport::{CommandOutput, CommandTransport};
use crate::validation::{self, Rejection, RejectionReason, Validated};

const RESULT_PREFIX: &str = "@@RESULT ";
const LOG_PREFIX: &str = "@@LOG ";

static FLAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^--[a-z][a-z0-9-]*$").unwrap());

/// Every script the pipeline may run on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    PodCreate,
    PodStart,
    PodStop,
    PodBackup,
    PodDestroy,
    PodStatus,
    TlsIssueProxy,
    TlsIssueStandalone,
}

pub const ALLOWED_SCRIPTS: [Script; 8] = [
    Script::PodCreate,
    Script::PodStart,
    Script::PodStop,
    Script::PodBackup,
    Script::PodDestroy,
    Script::PodStatus,
    Script::TlsIssueProxy,
    Script::TlsIssueStandalone,
];

impl Script {
    pub fn name(&self) -> &'static str {
        match self {
            Script::PodCreate => "pod-create",
            Script::PodStart => "pod-start",
            Script::PodStop => "pod-stop",
            Script::PodBackup => "pod-backup",
            Script::PodDestroy => "pod-destroy",
            Script::PodStatus => "pod-status",
            Script::TlsIssueProxy => "tls-issue-proxy",
            Script::TlsIssueStandalone => "tls-issue-standalone",
        }
    }

    /// Look a script up on the allow-list.
    pub fn from_name(name: &str) -> Option<Self> {
        ALLOWED_SCRIPTS.into_iter().find(|s| s.name() == name)
    }

    fn timeout(&self, config: &ProvisionConfig) -> Duration {
        match self {
            Script::PodStatus => config.command_timeout(),
            Script::TlsIssueProxy | Script::TlsIssueStandalone => config.acme_timeout(),
            _ => config.container_timeout(),
        }
    }
}

/// The validator an argument must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A `--flag` literal.
    Flag,
    Hostname,
    Domain,
    PodId,
    TenantId,
    PlanCode,
    InstanceId,
    Ipv4,
    StorageTarget,
    /// A resource size or port.
    Number,
}

#[derive(Debug, Clone)]
pub struct Arg {
    pub kind: ArgKind,
    pub value: String,
}

/// A script name plus typed arguments, not yet validated.
#[derive(Debug, Clone)]
pub struct Invocation {
    script: String,
    args: Vec<Arg>,
}

impl Invocation {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            args: Vec::new(),
        }
    }

    pub fn of(script: Script) -> Self {
        Self::new(script.name())
    }

    pub fn arg(mut self, kind: ArgKind, value: impl ToString) -> Self {
        self.args.push(Arg {
            kind,
            value: value.to_string(),
        });
        self
    }

    pub fn flag(self, flag: &str) -> Self {
        self.arg(ArgKind::Flag, flag)
    }

    /// `--flag value`.
    pub fn option(self, flag: &str, kind: ArgKind, value: impl ToString) -> Self {
        self.flag(flag).arg(kind, value)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }
}

fn validate_arg(arg: &Arg, config: &ProvisionConfig) -> Validated<String> {
    match arg.kind {
        ArgKind::Flag => {
            if validation::has_unsafe_characters(&arg.value) {
                Err(Rejection {
                    field: "flag",
                    reason: RejectionReason::UnsafeCharacters,
                })
            } else if FLAG_RE.is_match(&arg.value) {
                Ok(arg.value.clone())
            } else {
                Err(Rejection {
                    field: "flag",
                    reason: RejectionReason::InvalidFormat,
                })
            }
        }
        ArgKind::Hostname => validation::hostname(&arg.value),
        ArgKind::Domain => validation::domain(&arg.value),
        ArgKind::PodId => validation::pod_id(&arg.value).map(|id| id.to_string()),
        ArgKind::TenantId => validation::tenant_id(&arg.value).map(|id| id.to_string()),
        ArgKind::PlanCode => validation::plan_code(&arg.value),
        ArgKind::InstanceId => {
            validation::instance_id(&arg.value, config.instance_id_floor, config.instance_id_max)
                .map(|id| id.to_string())
        }
        ArgKind::Ipv4 => validation::ipv4(&arg.value).map(|ip| ip.to_string()),
        ArgKind::StorageTarget => validation::storage_target(&arg.value),
        ArgKind::Number => validation::instance_id(&arg.value, 0, u32::MAX)
            .map(|n| n.to_string())
            .map_err(|r| Rejection {
                field: "number",
                reason: r.reason,
            }),
    }
}

/// The `@@RESULT` line a script prints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultBlock {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Parsed script output.
#[derive(Debug, Clone, Default)]
pub struct ScriptReport {
    pub result: Option<ResultBlock>,
    pub logs: Vec<serde_json::Value>,
    /// Everything that was not a tagged line.
    pub output: String,
}

/// Split script stdout into the result block, structured log lines and
/// free text. The last result block wins; malformed tagged lines are kept
/// as text.
pub fn parse_report(stdout: &str) -> ScriptReport {
    let mut report = ScriptReport::default();
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
            if let Ok(block) = serde_json::from_str::<ResultBlock>(rest.trim()) {
                report.result = Some(block);
                continue;
            }
        } else if let Some(rest) = line.strip_prefix(LOG_PREFIX) {
            if let Ok(entry) = serde_json::from_str::<serde_json::Value>(rest.trim()) {
                report.logs.push(entry);
                continue;
            }
        }
        report.output.push_str(line);
        report.output.push('\n');
    }
    report
}

/// Validates and runs whitelisted scripts over a [`CommandTransport`].
#[derive(Clone)]
pub struct CommandExecutor<T: CommandTransport, S: Store> {
    transport: T,
    audit: AuditRecorder<S>,
    config: ProvisionConfig,
}

impl<T: CommandTransport, S: Store> CommandExecutor<T, S> {
    pub fn new(transport: T, audit: AuditRecorder<S>, config: ProvisionConfig) -> Self {
        Self {
            transport,
            audit,
            config,
        }
    }

    /// Validate `invocation`, run it on `host` and return the parsed
    /// result block. A non-zero exit, a missing block or
    /// `success: false` are all `RemoteCommand` failures.
    pub async fn run(
        &self,
        scope: &AuditScope,
        host: &str,
        invocation: Invocation,
    ) -> ProvisionResult<ResultBlock> {
        let (script, argv) = match self.prepare(host, &invocation) {
            Ok(prepared) => prepared,
            Err(rejection) => {
                self.audit
                    .input_rejected(scope, &rejection, invocation.script())
                    .await;
                return Err(rejection.into());
            }
        };

        let output = self
            .transport
            .execute(host, script.name(), &argv, script.timeout(&self.config))
            .await?;
        self.interpret(script, output)
    }

    fn prepare(&self, host: &str, invocation: &Invocation) -> Validated<(Script, Vec<String>)> {
        let script = Script::from_name(invocation.script()).ok_or(Rejection {
            field: "script",
            reason: RejectionReason::NotInWhitelist,
        })?;
        validation::hostname(host).map_err(|r| Rejection {
            field: "host",
            reason: r.reason,
        })?;
        let argv = invocation
            .args
            .iter()
            .map(|arg| validate_arg(arg, &self.config))
            .collect::<Validated<Vec<_>>>()?;
        Ok((script, argv))
    }

    fn interpret(&self, script: Script, output: CommandOutput) -> ProvisionResult<ResultBlock> {
        let report = parse_report(&output.stdout);
        for entry in &report.logs {
            info!(script = script.name(), event = %entry, "Host script log");
        }

        let failure = |message: String| ProvisionError::RemoteCommand {
            script: script.name().to_string(),
            message,
        };

        match report.result {
            Some(block) if block.success && output.succeeded() => Ok(block),
            Some(block) => {
                let message = block
                    .message
                    .unwrap_or_else(|| format!("exit code {:?}", output.exit_code));
                warn!(script = script.name(), exit_code = ?output.exit_code, %message, "Host script failed");
                Err(failure(message))
            }
            None => {
                let stderr = output.stderr.trim();
                warn!(script = script.name(), exit_code = ?output.exit_code, stderr, "Host script printed no result");
                Err(failure(if stderr.is_empty() {
                    "no result block".to_string()
                } else {
                    stderr.to_string()
                }))
            }
        }
    }
}
