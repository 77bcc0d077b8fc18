use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use aso_core::hash::sha256_reader;
use aso_core::id::{BuildId, IntentId};
use aso_core::types::{Artifact, IntegrityReport, Manifest};

use crate::layout::{normalize_filename, VaultLayout};
use crate::{read_manifest_at, VaultError};

/// Checks a build's manifest against the files on disk.
///
/// Every check runs and every violation is reported; nothing is repaired.
/// Only an invalid `project`/`build_id` is returned as an error.
pub fn verify_build(
    layout: &VaultLayout,
    project: &str,
    build_id: &BuildId,
) -> Result<IntegrityReport, VaultError> {
    let build_dir = layout.build_dir(project, build_id)?;
    let manifest_path = layout.manifest_path(project, build_id)?;

    let manifest = match read_manifest_at(&manifest_path) {
        Ok(Some(manifest)) => manifest,
        Ok(None) => {
            return Ok(IntegrityReport::from_errors(vec![format!(
                "No manifest found for {project}/{build_id}"
            )]))
        }
        Err(e) => {
            return Ok(IntegrityReport::from_errors(vec![format!(
                "Manifest unreadable: {e}"
            )]))
        }
    };

    let mut errors = Vec::new();
    if manifest.project != project || &manifest.build_id != build_id {
        errors.push(format!(
            "manifest describes {}/{} but is stored under {project}/{build_id}",
            manifest.project, manifest.build_id
        ));
    }
    if let Err(e) = IntentId::parse(manifest.intent_id.as_str()) {
        errors.push(format!("manifest has an {e}"));
    }
    for (name, artifact) in &manifest.files {
        if let Some(problem) = check_file(&build_dir, name, artifact) {
            errors.push(problem);
        }
    }
    check_chain(&manifest, &mut errors);

    let report = IntegrityReport::from_errors(errors);
    if !report.valid {
        warn!(%project, %build_id, errors = report.errors.len(), "integrity check failed");
    }
    Ok(report)
}

fn check_file(build_dir: &Path, name: &str, expected: &Artifact) -> Option<String> {
    let Ok(rel) = normalize_filename(name) else {
        return Some(format!("{name}: invalid file name in manifest"));
    };
    let path = build_dir.join(rel);
    let meta = match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Some(format!("Missing file: {name}")),
        Err(e) if e.kind() == ErrorKind::NotFound => return Some(format!("Missing file: {name}")),
        Err(e) => return Some(format!("{name}: unreadable ({e})")),
    };
    if meta.len() != expected.size {
        return Some(format!(
            "{name}: size mismatch (expected {} bytes, found {})",
            expected.size,
            meta.len()
        ));
    }
    match File::open(&path).and_then(sha256_reader) {
        Ok((hash, _)) if hash != expected.hash => Some(format!(
            "{name}: hash mismatch (expected {}, found {hash})",
            expected.hash
        )),
        Ok(_) => None,
        Err(e) => Some(format!("{name}: unreadable ({e})")),
    }
}

fn check_chain(manifest: &Manifest, errors: &mut Vec<String>) {
    match manifest.compute_chain_hash() {
        Ok(computed) if computed != manifest.chain_hash => errors.push(format!(
            "chain hash mismatch (stored {}, computed {computed})",
            manifest.chain_hash
        )),
        Ok(_) => {}
        Err(e) => errors.push(format!("chain hash could not be computed: {e}")),
    }
}
