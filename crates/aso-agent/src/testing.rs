use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use aso_core::types::{BuildConfig, BuildStep};

use crate::runtime::{ContainerRuntime, StepInvocation, StepOutput};
use crate::AgentError;

/// Interprets step commands instead of starting containers:
/// `exit N`, `sleep-ms N`, `unreachable`, and `emit <name> <text>` which
/// writes a file under the work dir's `artifacts/`.
#[derive(Default)]
pub(crate) struct ScriptedRuntime {
    calls: Mutex<Vec<StepInvocation>>,
    aborted: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub(crate) fn invocations(&self) -> Vec<StepInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.command).collect()
    }

    pub(crate) fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn run(&self, invocation: &StepInvocation) -> Result<StepOutput, AgentError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let command = invocation.command.as_str();
        let ok = |stdout: &str| StepOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        };

        if let Some(code) = command.strip_prefix("exit ") {
            let exit_code: i32 = code.parse().unwrap();
            return Ok(StepOutput {
                exit_code,
                stdout: format!("ran {command}"),
                stderr: if exit_code == 0 { String::new() } else { "boom".to_string() },
            });
        }
        if let Some(ms) = command.strip_prefix("sleep-ms ") {
            tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
            return Ok(ok("slept"));
        }
        if let Some(rest) = command.strip_prefix("emit ") {
            let (name, text) = rest.split_once(' ').unwrap();
            let path = invocation.host_work_dir.join("artifacts").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
            return Ok(ok("emitted"));
        }
        if command == "unreachable" {
            return Err(AgentError::Runtime("container runtime unreachable".to_string()));
        }
        Ok(ok(""))
    }

    async fn abort(&self, invocation: &StepInvocation) {
        self.aborted
            .lock()
            .unwrap()
            .push(invocation.container_name.clone());
    }
}

pub(crate) fn config(steps: &[(&str, &str)]) -> BuildConfig {
    BuildConfig {
        image: "alpine:3".to_string(),
        steps: steps
            .iter()
            .map(|(name, command)| BuildStep {
                name: name.to_string(),
                command: command.to_string(),
                working_dir: None,
            })
            .collect(),
        env: BTreeMap::new(),
        artifacts: vec![],
        step_timeout_secs: None,
    }
}
