pub mod collect;
pub mod error;
pub mod pipeline;
pub mod prepare;
pub mod runner;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use error::AgentError;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use runtime::{ContainerRuntime, DockerRuntime, StepInvocation, StepOutput};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use aso_core::id::{BuildId, IntentId};
use aso_core::types::{BuildConfig, BuildContext, BuildResult};

/// Prepares work directories and runs build steps in containers.
#[derive(Clone)]
pub struct BuildAgent {
    base_work_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    step_timeout: Option<Duration>,
}

impl BuildAgent {
    pub fn new(base_work_dir: &Path, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            base_work_dir: base_work_dir.to_path_buf(),
            runtime,
            step_timeout: None,
        }
    }

    /// Default per-step deadline; a config's own `stepTimeoutSecs` wins.
    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn base_work_dir(&self) -> &Path {
        &self.base_work_dir
    }

    pub fn generate_build_id(project: &str) -> BuildId {
        BuildId::generate(project)
    }

    pub fn prepare_build(
        &self,
        project: &str,
        intent_id: &IntentId,
        config: &BuildConfig,
    ) -> Result<BuildContext, AgentError> {
        prepare::prepare_build(&self.base_work_dir, project, intent_id, config)
    }

    pub async fn run_build(&self, ctx: &BuildContext, config: &BuildConfig) -> BuildResult {
        runner::run_steps(
            self.runtime.as_ref(),
            ctx,
            config,
            self.timeout_for(config),
            None,
        )
        .await
    }

    /// Like [`run_build`](Self::run_build), but abandons the running step and
    /// skips the rest once `cancel` turns true.
    pub async fn run_build_with_cancel(
        &self,
        ctx: &BuildContext,
        config: &BuildConfig,
        cancel: watch::Receiver<bool>,
    ) -> BuildResult {
        runner::run_steps(
            self.runtime.as_ref(),
            ctx,
            config,
            self.timeout_for(config),
            Some(cancel),
        )
        .await
    }

    fn timeout_for(&self, config: &BuildConfig) -> Option<Duration> {
        config.step_timeout().or(self.step_timeout)
    }
}
