use std::path::{Component, Path, PathBuf};

use aso_core::id::BuildId;
use aso_core::types::MANIFEST_FILE;

use crate::VaultError;

/// `<root>/<project>/<build_id>/{files..., manifest.json}`
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> Result<PathBuf, VaultError> {
        check_segment(project)?;
        Ok(self.root.join(project))
    }

    pub fn build_dir(&self, project: &str, build_id: &BuildId) -> Result<PathBuf, VaultError> {
        check_segment(build_id.as_str())?;
        Ok(self.project_dir(project)?.join(build_id.as_str()))
    }

    pub fn manifest_path(&self, project: &str, build_id: &BuildId) -> Result<PathBuf, VaultError> {
        Ok(self.build_dir(project, build_id)?.join(MANIFEST_FILE))
    }

    /// Absolute location of an artifact plus its vault-relative path
    /// (`<project>/<build_id>/<name>`, always `/`-separated).
    pub fn artifact_path(
        &self,
        project: &str,
        build_id: &BuildId,
        filename: &str,
    ) -> Result<(PathBuf, String), VaultError> {
        let name = normalize_filename(filename)?;
        let abs = self.build_dir(project, build_id)?.join(&name);
        Ok((abs, format!("{project}/{build_id}/{name}")))
    }
}

/// A project or build id must be exactly one ordinary path component.
pub fn check_segment(name: &str) -> Result<(), VaultError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name && !name.starts_with('.') => Ok(()),
        _ => Err(VaultError::InvalidName(name.to_string())),
    }
}

/// Artifact names are relative paths made of ordinary components. The
/// manifest's own file name is reserved.
pub fn normalize_filename(filename: &str) -> Result<String, VaultError> {
    let invalid = || VaultError::InvalidName(filename.to_string());
    let mut parts = Vec::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(invalid)?),
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    if parts.is_empty() || parts == [MANIFEST_FILE] {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}
