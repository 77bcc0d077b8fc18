pub mod error;
pub mod layout;
pub mod staging;
pub mod verify;

pub use error::VaultError;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use aso_core::hash::sha256_hex;
use aso_core::id::{BuildId, IntentId};
use aso_core::types::{Artifact, IntegrityReport, Manifest, MANIFEST_FILE};

use crate::layout::{check_segment, VaultLayout};

/// Content-addressed evidence store on the local filesystem.
///
/// There is no internal locking: a given `(project, build_id)` must be
/// written by one pipeline at a time.
pub struct EvidenceVault {
    layout: VaultLayout,
}

impl EvidenceVault {
    pub fn open(root: &Path) -> Result<Self, VaultError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            layout: VaultLayout::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    /// Creates the build directory if needed; a no-op when it exists.
    pub fn create_build_directory(
        &self,
        project: &str,
        build_id: &BuildId,
    ) -> Result<PathBuf, VaultError> {
        let dir = self.layout.build_dir(project, build_id)?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Stores `content` verbatim under the build, replacing any file of the
    /// same name.
    pub fn write_artifact(
        &self,
        project: &str,
        build_id: &BuildId,
        filename: &str,
        content: &[u8],
    ) -> Result<Artifact, VaultError> {
        let (path, rel) = self.layout.artifact_path(project, build_id, filename)?;
        staging::write_atomic(&path, content)?;
        let artifact = Artifact {
            hash: sha256_hex(content),
            size: content.len() as u64,
            path: rel,
        };
        debug!(path = %artifact.path, size = artifact.size, "artifact written");
        Ok(artifact)
    }

    /// Writes `manifest.json` for the manifest's own project and build,
    /// replacing any previous manifest wholesale. The chain hash is stored
    /// as given.
    pub fn write_manifest(&self, manifest: &Manifest) -> Result<PathBuf, VaultError> {
        let path = self
            .layout
            .manifest_path(&manifest.project, &manifest.build_id)?;
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| VaultError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        staging::write_atomic(&path, &json)?;
        info!(
            project = %manifest.project,
            build_id = %manifest.build_id,
            files = manifest.files.len(),
            chain_hash = %manifest.chain_hash,
            "manifest written"
        );
        Ok(path)
    }

    /// Computes the chain hash over `files` and writes the manifest.
    pub fn seal_build(
        &self,
        project: &str,
        build_id: &BuildId,
        intent_id: &IntentId,
        files: BTreeMap<String, Artifact>,
    ) -> Result<Manifest, VaultError> {
        let manifest = Manifest::seal(
            build_id.clone(),
            project,
            intent_id.clone(),
            Utc::now(),
            files,
        )?;
        self.write_manifest(&manifest)?;
        Ok(manifest)
    }

    /// The stored manifest, unvalidated. `None` when there is none.
    pub fn read_manifest(
        &self,
        project: &str,
        build_id: &BuildId,
    ) -> Result<Option<Manifest>, VaultError> {
        read_manifest_at(&self.layout.manifest_path(project, build_id)?)
    }

    pub fn verify_integrity(
        &self,
        project: &str,
        build_id: &BuildId,
    ) -> Result<IntegrityReport, VaultError> {
        verify::verify_build(&self.layout, project, build_id)
    }

    /// Manifests of every build under `project` (or every project), newest
    /// `created_at` first, as stored and unverified. Only manifests that do
    /// not parse as JSON are skipped, with a warning.
    pub fn list_builds(&self, project: Option<&str>) -> Result<Vec<Manifest>, VaultError> {
        let mut manifests = Vec::new();
        for dir in self.manifested_dirs(project)? {
            let path = dir.join(MANIFEST_FILE);
            match read_manifest_at(&path) {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping manifest"),
            }
        }
        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.build_id.cmp(&a.build_id))
        });
        Ok(manifests)
    }

    /// Directories of manifested builds, sorted lexicographically.
    pub fn list_build_dirs(&self, project: Option<&str>) -> Result<Vec<PathBuf>, VaultError> {
        let mut dirs = self.manifested_dirs(project)?;
        dirs.sort();
        Ok(dirs)
    }

    fn manifested_dirs(&self, project: Option<&str>) -> Result<Vec<PathBuf>, VaultError> {
        let projects = match project {
            Some(p) => vec![self.layout.project_dir(p)?],
            None => subdirs(self.layout.root())?,
        };
        let mut dirs = Vec::new();
        for project_dir in projects {
            for build_dir in subdirs(&project_dir)? {
                if build_dir.join(MANIFEST_FILE).is_file() {
                    dirs.push(build_dir);
                }
            }
        }
        Ok(dirs)
    }
}

pub(crate) fn read_manifest_at(path: &Path) -> Result<Option<Manifest>, VaultError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VaultError::Io(e)),
    };
    let manifest = serde_json::from_slice(&bytes).map_err(|e| VaultError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(manifest))
}

/// Visible subdirectories of `dir`; empty when `dir` does not exist.
fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, VaultError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() && name.to_str().is_some_and(|n| check_segment(n).is_ok()) {
            out.push(path);
        }
    }
    Ok(out)
}
