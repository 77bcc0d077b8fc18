use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use aso_core::types::{BuildConfig, BuildContext, BuildResult, BuildStatus, StepResult, StepStatus};

use crate::runtime::{ContainerRuntime, StepInvocation};

enum Outcome {
    Finished(Result<crate::runtime::StepOutput, crate::AgentError>),
    TimedOut,
    Cancelled,
}

/// Runs the config's steps in order, stopping at the first one that does
/// not succeed. Never errors: every failure is captured in the result.
pub(crate) async fn run_steps(
    runtime: &dyn ContainerRuntime,
    ctx: &BuildContext,
    config: &BuildConfig,
    step_timeout: Option<Duration>,
    cancel: Option<watch::Receiver<bool>>,
) -> BuildResult {
    let started_at = Utc::now();
    let mut steps = Vec::with_capacity(config.steps.len());
    let mut status = BuildStatus::Success;

    for (index, step) in config.steps.iter().enumerate() {
        if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            status = BuildStatus::Cancelled;
            break;
        }

        let invocation = StepInvocation::new(ctx, config, step, index);
        let result = run_step(runtime, &step.name, &invocation, step_timeout, cancel.clone()).await;
        info!(
            build_id = %ctx.build_id,
            step = %result.name,
            status = %result.status,
            exit_code = ?result.exit_code,
            "step finished"
        );
        let step_status = result.status;
        steps.push(result);

        match step_status {
            StepStatus::Success => {}
            StepStatus::Cancelled => {
                status = BuildStatus::Cancelled;
                break;
            }
            StepStatus::Failed | StepStatus::TimedOut => {
                status = BuildStatus::Failed;
                break;
            }
        }
    }

    info!(build_id = %ctx.build_id, %status, steps = steps.len(), "build finished");
    BuildResult {
        build_id: ctx.build_id.clone(),
        project: ctx.project.clone(),
        intent_id: ctx.intent_id.clone(),
        status,
        steps,
        started_at,
        completed_at: Utc::now(),
    }
}

async fn run_step(
    runtime: &dyn ContainerRuntime,
    name: &str,
    invocation: &StepInvocation,
    step_timeout: Option<Duration>,
    cancel: Option<watch::Receiver<bool>>,
) -> StepResult {
    let started_at = Utc::now();
    let outcome = {
        let mut run = runtime.run(invocation);
        tokio::select! {
            res = &mut run => Outcome::Finished(res),
            _ = deadline(step_timeout) => Outcome::TimedOut,
            _ = cancelled(cancel) => Outcome::Cancelled,
        }
    };

    let mut result = StepResult {
        name: name.to_string(),
        status: StepStatus::Failed,
        started_at,
        completed_at: started_at,
        exit_code: None,
        output: None,
        error: None,
    };
    match outcome {
        Outcome::Finished(Ok(output)) => {
            result.exit_code = Some(output.exit_code);
            result.output = Some(output.stdout);
            if output.exit_code == 0 {
                result.status = StepStatus::Success;
            } else if output.stderr.trim().is_empty() {
                result.error = Some(format!("exited with code {}", output.exit_code));
            } else {
                result.error = Some(output.stderr);
            }
        }
        Outcome::Finished(Err(e)) => {
            warn!(container = %invocation.container_name, error = %e, "step could not be launched");
            result.error = Some(e.to_string());
        }
        Outcome::TimedOut => {
            runtime.abort(invocation).await;
            result.status = StepStatus::TimedOut;
            result.error = Some(format!(
                "step exceeded its {}s timeout",
                step_timeout.map_or(0, |d| d.as_secs())
            ));
        }
        Outcome::Cancelled => {
            runtime.abort(invocation).await;
            result.status = StepStatus::Cancelled;
            result.error = Some("build cancelled".to_string());
        }
    }
    result.completed_at = Utc::now();
    result
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Resolves once the flag turns true. A dropped sender never cancels.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, ScriptedRuntime};
    use crate::BuildAgent;
    use aso_core::id::IntentId;
    use std::sync::Arc;

    fn agent(runtime: &Arc<ScriptedRuntime>, tmp: &tempfile::TempDir) -> BuildAgent {
        BuildAgent::new(tmp.path(), runtime.clone())
    }

    fn prepared(agent: &BuildAgent, cfg: &BuildConfig) -> BuildContext {
        agent
            .prepare_build("ASO", &IntentId::parse("int-20260314-a1b2c3d").unwrap(), cfg)
            .unwrap()
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("fetch", "exit 0"), ("build", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let result = agent.run_build(&ctx, &cfg).await;
        assert!(result.succeeded());
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.iter().all(|s| s.exit_code == Some(0)));
        assert_eq!(result.build_id, ctx.build_id);
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn stops_at_first_failing_step() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("a", "exit 0"), ("b", "exit 1"), ("c", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let result = agent.run_build(&ctx, &cfg).await;
        assert_eq!(result.status, BuildStatus::Failed);
        assert_eq!(result.steps.len(), 2);
        let failed = result.failed_step().unwrap();
        assert_eq!(failed.name, "b");
        assert_eq!(failed.exit_code, Some(1));
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(runtime.commands(), vec!["exit 0", "exit 1"]);
    }

    #[tokio::test]
    async fn launch_failure_is_a_failed_step() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("a", "unreachable"), ("b", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let result = agent.run_build(&ctx, &cfg).await;
        assert_eq!(result.status, BuildStatus::Failed);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].exit_code, None);
        assert!(result.steps[0].error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn empty_config_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[]);
        let ctx = prepared(&agent, &cfg);
        let result = agent.run_build(&ctx, &cfg).await;
        assert!(result.succeeded());
        assert!(result.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_step_times_out_and_is_aborted() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp).with_step_timeout(Some(Duration::from_secs(5)));
        let cfg = config(&[("slow", "sleep-ms 60000"), ("after", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let result = agent.run_build(&ctx, &cfg).await;
        assert_eq!(result.status, BuildStatus::Failed);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::TimedOut);
        assert_eq!(runtime.aborted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn config_timeout_overrides_agent_default() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp).with_step_timeout(Some(Duration::from_secs(1)));
        let mut cfg = config(&[("medium", "sleep-ms 3000")]);
        cfg.step_timeout_secs = Some(10);
        let ctx = prepared(&agent, &cfg);

        let result = agent.run_build(&ctx, &cfg).await;
        assert!(result.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_build() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("slow", "sleep-ms 60000"), ("after", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });
        let result = agent.run_build_with_cancel(&ctx, &cfg, rx).await;
        assert_eq!(result.status, BuildStatus::Cancelled);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Cancelled);
        assert_eq!(runtime.commands(), vec!["sleep-ms 60000"]);
    }

    #[tokio::test]
    async fn already_cancelled_runs_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("a", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        let (_tx, rx) = watch::channel(true);
        let result = agent.run_build_with_cancel(&ctx, &cfg, rx).await;
        assert_eq!(result.status, BuildStatus::Cancelled);
        assert!(result.steps.is_empty());
        assert!(runtime.commands().is_empty());
    }

    #[tokio::test]
    async fn steps_see_the_build_env() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = agent(&runtime, &tmp);
        let cfg = config(&[("a", "exit 0")]);
        let ctx = prepared(&agent, &cfg);

        agent.run_build(&ctx, &cfg).await;
        let calls = runtime.invocations();
        assert_eq!(calls[0].env, ctx.env);
        assert_eq!(calls[0].host_work_dir, ctx.work_dir);
        assert_eq!(calls[0].image, "alpine:3");
    }
}
