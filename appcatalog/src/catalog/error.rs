//! Catalog errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::repo::RepoId;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    #[error("Catalog file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unknown repository {0}")]
    UnknownRepository(RepoId),

    #[error("Repository {0} already exists")]
    DuplicateRepository(String),

    /// The commit carries a certificate other than the pinned one.
    #[error("Repository {0} is pinned to a different signing certificate")]
    CertificateMismatch(RepoId),
}
