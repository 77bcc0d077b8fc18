use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use aso_core::id::{BuildId, IntentId};
use aso_core::types::{
    BuildConfig, BuildContext, BuildStatus, ARTIFACTS_DIR, BUILD_CONFIG_FILE, ENV_ARTIFACTS_DIR,
    ENV_BUILD_ID, ENV_INTENT_ID, ENV_PROJECT, ENV_WORK_DIR,
};

use crate::AgentError;

const MAX_ID_ATTEMPTS: usize = 8;

/// Allocates a fresh work dir under `base`, writes the build config into it
/// and returns the context every step will run in.
pub fn prepare_build(
    base: &Path,
    project: &str,
    intent_id: &IntentId,
    config: &BuildConfig,
) -> Result<BuildContext, AgentError> {
    let (build_id, work_dir) = claim_work_dir(base, project)?;
    let artifacts_dir = work_dir.join(ARTIFACTS_DIR);
    std::fs::create_dir_all(&artifacts_dir)?;

    let json =
        serde_json::to_vec_pretty(config).map_err(|e| AgentError::Serialization(e.to_string()))?;
    std::fs::write(work_dir.join(BUILD_CONFIG_FILE), json)?;

    let env = build_env(config, &build_id, project, intent_id, &work_dir, &artifacts_dir);
    info!(
        %build_id,
        %project,
        intent = %intent_id,
        work_dir = %work_dir.display(),
        "build prepared"
    );

    Ok(BuildContext {
        build_id,
        project: project.to_string(),
        intent_id: intent_id.clone(),
        work_dir,
        artifacts_dir,
        env,
        status: BuildStatus::Pending,
        created_at: Utc::now(),
    })
}

/// Config env plus the reserved build variables, which always win.
pub fn build_env(
    config: &BuildConfig,
    build_id: &BuildId,
    project: &str,
    intent_id: &IntentId,
    work_dir: &Path,
    artifacts_dir: &Path,
) -> BTreeMap<String, String> {
    let mut env = config.env.clone();
    env.insert(ENV_BUILD_ID.to_string(), build_id.to_string());
    env.insert(ENV_PROJECT.to_string(), project.to_string());
    env.insert(ENV_INTENT_ID.to_string(), intent_id.to_string());
    env.insert(ENV_WORK_DIR.to_string(), work_dir.display().to_string());
    env.insert(
        ENV_ARTIFACTS_DIR.to_string(),
        artifacts_dir.display().to_string(),
    );
    env
}

/// `create_dir` doubles as the uniqueness check for generated build ids.
fn claim_work_dir(base: &Path, project: &str) -> Result<(BuildId, PathBuf), AgentError> {
    std::fs::create_dir_all(base)?;
    // A relative bind-mount source is taken as a volume name by the runtime.
    let base = std::path::absolute(base)?;
    for _ in 0..MAX_ID_ATTEMPTS {
        let build_id = BuildId::generate(project);
        let dir = base.join(build_id.as_str());
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok((build_id, dir)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AgentError::BuildIdExhausted)
}
