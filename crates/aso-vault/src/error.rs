use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid vault name: {0}")]
    InvalidName(String),
    #[error("unreadable manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] aso_core::CoreError),
}
