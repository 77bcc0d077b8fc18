use std::io::Write;
use std::path::Path;

use crate::VaultError;

/// Writes `data` to `path` by staging it in a temp file in the same directory
/// and renaming it into place, so readers never observe a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let dir = path
        .parent()
        .ok_or_else(|| VaultError::InvalidName(path.display().to_string()))?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| VaultError::Io(e.error))?;
    Ok(())
}
