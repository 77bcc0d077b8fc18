use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use aso_core::types::{ARTIFACTS_DIR, BUILD_CONFIG_FILE};

use crate::AgentError;

/// Name under which the serialized `BuildResult` is sealed with the evidence.
pub const BUILD_RESULT_FILE: &str = "build-result.json";

/// Files under `work_dir` matching `patterns`, as `(relative name, path)`
/// sorted by name. With no patterns everything under `artifacts/` is taken.
/// Symlinks are skipped, as are the files the pipeline seals itself.
pub fn collect_artifacts(
    work_dir: &Path,
    patterns: &[String],
) -> Result<Vec<(String, PathBuf)>, AgentError> {
    let matcher = if patterns.is_empty() {
        glob_set(&[format!("{ARTIFACTS_DIR}/**")])?
    } else {
        glob_set(patterns)?
    };

    let mut files = Vec::new();
    walk(work_dir, "", &mut files)?;
    files.retain(|(name, _)| {
        name != BUILD_CONFIG_FILE && name != BUILD_RESULT_FILE && matcher.is_match(name)
    });
    files.sort();
    Ok(files)
}

fn glob_set(patterns: &[String]) -> Result<GlobSet, AgentError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| AgentError::Pattern(e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AgentError::Pattern(e.to_string()))
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> Result<(), AgentError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if file_type.is_dir() {
            walk(&entry.path(), &rel, out)?;
        } else if file_type.is_file() {
            out.push((rel, entry.path()));
        }
    }
    Ok(())
}
