//! Error types for install orchestration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Result type for install operations.
pub type InstallResult<T> = Result<T, InstallError>;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {filename}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },

    #[error("Pending install store {path} is corrupt: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("No version of {package} is available")]
    NoVersion { package: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
