use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use aso_core::types::{BuildConfig, BuildContext, BuildStep};

use crate::AgentError;

/// Mount point of the build's work dir inside every step container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Captured stdout/stderr is cut down to its last this-many bytes.
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Everything needed to run one step in a fresh container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    pub container_name: String,
    pub image: String,
    pub host_work_dir: PathBuf,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    pub command: String,
}

impl StepInvocation {
    pub fn new(ctx: &BuildContext, config: &BuildConfig, step: &BuildStep, index: usize) -> Self {
        let container_name: String = format!("{}-{}", ctx.build_id, index)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Self {
            container_name,
            image: config.image.clone(),
            host_work_dir: ctx.work_dir.clone(),
            working_dir: step
                .working_dir
                .clone()
                .unwrap_or_else(|| CONTAINER_WORKSPACE.to_string()),
            env: ctx.env.clone(),
            command: step.command.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The external container tool, treated as a black box.
///
/// `run` returns an error only when the step could not be launched at all;
/// a non-zero exit is a normal [`StepOutput`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, invocation: &StepInvocation) -> Result<StepOutput, AgentError>;

    /// Best-effort teardown of a step abandoned on timeout or cancellation.
    async fn abort(&self, _invocation: &StepInvocation) {}
}

/// Runs steps through a docker-compatible CLI (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    program: String,
}

impl DockerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn run_args(&self, invocation: &StepInvocation) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            invocation.container_name.clone(),
            "-v".to_string(),
            format!(
                "{}:{CONTAINER_WORKSPACE}:rw",
                invocation.host_work_dir.display()
            ),
            "-w".to_string(),
            invocation.working_dir.clone(),
        ];
        for (key, value) in &invocation.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(invocation.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(invocation.command.clone());
        args
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, invocation: &StepInvocation) -> Result<StepOutput, AgentError> {
        debug!(
            program = %self.program,
            container = %invocation.container_name,
            "starting step container"
        );
        let output = Command::new(&self.program)
            .args(self.run_args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::Runtime(format!("failed to launch {}: {e}", self.program)))?;

        Ok(StepOutput {
            // No exit code means the process was killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: captured(&output.stdout),
            stderr: captured(&output.stderr),
        })
    }

    async fn abort(&self, invocation: &StepInvocation) {
        let result = Command::new(&self.program)
            .args(["kill", invocation.container_name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(
                container = %invocation.container_name,
                error = %e,
                "could not kill step container"
            );
        }
    }
}

/// Lossy UTF-8 of the tail of `bytes`, bounded by `MAX_CAPTURED_OUTPUT`.
pub(crate) fn captured(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_CAPTURED_OUTPUT {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let tail = &bytes[bytes.len() - MAX_CAPTURED_OUTPUT..];
    format!(
        "[... {} bytes truncated]\n{}",
        bytes.len() - MAX_CAPTURED_OUTPUT,
        String::from_utf8_lossy(tail)
    )
}
