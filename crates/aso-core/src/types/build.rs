use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BuildId, IntentId};

/// Name of the serialized build configuration inside a build's work dir.
pub const BUILD_CONFIG_FILE: &str = "build-config.json";
/// Subdirectory of the work dir where steps leave their outputs.
pub const ARTIFACTS_DIR: &str = "artifacts";

pub const ENV_BUILD_ID: &str = "BUILD_ID";
pub const ENV_PROJECT: &str = "PROJECT";
pub const ENV_INTENT_ID: &str = "INTENT_ID";
pub const ENV_WORK_DIR: &str = "WORK_DIR";
pub const ENV_ARTIFACTS_DIR: &str = "ARTIFACTS_DIR";

/// Keys the agent always sets itself; a value supplied in `BuildConfig::env`
/// under one of these names is overridden.
pub const RESERVED_ENV_KEYS: [&str; 5] = [
    ENV_BUILD_ID,
    ENV_PROJECT,
    ENV_INTENT_ID,
    ENV_WORK_DIR,
    ENV_ARTIFACTS_DIR,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Declarative description of a build: container image, ordered steps, extra
/// environment, and the files to hand to the evidence vault afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub image: String,
    pub steps: Vec<BuildStep>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Glob patterns relative to the work dir.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
}

impl BuildConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    TimedOut,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prepared build: where it runs and the environment every step sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    pub build_id: BuildId,
    pub project: String,
    pub intent_id: IntentId,
    pub work_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub build_id: BuildId,
    pub project: String,
    pub intent_id: IntentId,
    pub status: BuildStatus,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Success
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status != StepStatus::Success)
    }
}
